use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Detection kinds reported by camera nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionKind {
    Motion,
    Face,
    Object,
}

impl DetectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Motion => "motion",
            Self::Face => "face",
            Self::Object => "object",
        }
    }
}

impl std::fmt::Display for DetectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounding region of a detection, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One alert record, emitted for every detection start event.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub camera_id: String,
    pub kind: DetectionKind,
    pub event: String,
    pub confidence: Option<f64>,
    pub region: Option<Region>,
    pub received: DateTime<Utc>,
}

impl Alert {
    pub fn new(camera_id: impl Into<String>, kind: DetectionKind, event: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            camera_id: camera_id.into(),
            kind,
            event: event.into(),
            confidence: None,
            region: None,
            received: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_region(mut self, region: Option<Region>) -> Self {
        self.region = region;
        self
    }
}

/// External alert store collaborator.
pub trait AlertSink: Send + Sync {
    fn record(&self, alert: Alert);
}

/// Default sink: alerts only reach the log.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn record(&self, alert: Alert) {
        info!(
            "Alert: {} {} on camera {} (confidence: {})",
            alert.kind,
            alert.event,
            alert.camera_id,
            alert
                .confidence
                .map(|c| format!("{:.2}", c))
                .unwrap_or_else(|| "n/a".to_string()),
        );
    }
}

/// Collecting sink used by tests.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: parking_lot::Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }
}

impl AlertSink for MemoryAlertSink {
    fn record(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}
