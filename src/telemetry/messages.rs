use serde::Deserialize;
use serde_json::Value;

use crate::alerts::{DetectionKind, Region};

/// Result of the two-tier status parse: structured JSON first, bare string
/// as the backward-compatible fallback. Resolved once at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusPayload {
    Structured(StatusUpdate),
    Legacy(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
}

impl StatusPayload {
    /// Returns None only when the payload is not valid UTF-8 either.
    pub fn parse(payload: &[u8]) -> Option<StatusPayload> {
        if let Ok(update) = serde_json::from_slice::<StatusUpdate>(payload) {
            return Some(StatusPayload::Structured(update));
        }
        match std::str::from_utf8(payload) {
            Ok(s) => Some(StatusPayload::Legacy(s.trim().to_string())),
            Err(_) => None,
        }
    }
}

/// A parsed motion/face/object message. The raw payload is retained for the
/// camera's event history ring.
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    pub event: String,
    pub confidence: Option<f64>,
    pub region: Option<Region>,
    pub raw: Value,
}

impl DetectionEvent {
    /// Structured parse; a JSON object with an `event` string is required.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let raw: Value = serde_json::from_slice(payload).ok()?;
        let event = raw.get("event")?.as_str()?.to_string();
        let confidence = raw
            .get("confidence")
            .and_then(Value::as_f64)
            .or_else(|| raw.get("max_confidence").and_then(Value::as_f64));
        let region = raw
            .get("region")
            .and_then(|r| serde_json::from_value(r.clone()).ok());
        Some(Self {
            event,
            confidence,
            region,
            raw,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionEdge {
    Start,
    End,
}

/// Map a per-camera topic segment to its detection kind.
pub fn kind_from_topic(segment: &str) -> Option<DetectionKind> {
    match segment {
        "motion" => Some(DetectionKind::Motion),
        "face" => Some(DetectionKind::Face),
        "object" => Some(DetectionKind::Object),
        _ => None,
    }
}

/// Classify an event name as a detection start or end. Other event names are
/// retained in the history but flip no flags and raise no alerts.
pub fn classify(kind: DetectionKind, event: &str) -> Option<DetectionEdge> {
    match (kind, event) {
        (DetectionKind::Motion, "motion_start") => Some(DetectionEdge::Start),
        (DetectionKind::Motion, "motion_end") => Some(DetectionEdge::End),
        (DetectionKind::Face, "face_detected") => Some(DetectionEdge::Start),
        (DetectionKind::Face, "face_end") => Some(DetectionEdge::End),
        (DetectionKind::Object, "objects_detected") => Some(DetectionEdge::Start),
        (DetectionKind::Object, "objects_cleared") => Some(DetectionEdge::End),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_parse_structured() {
        let payload = br#"{"status":"online","node_type":"motion"}"#;
        match StatusPayload::parse(payload).unwrap() {
            StatusPayload::Structured(update) => {
                assert_eq!(update.status, "online");
                assert_eq!(update.node_type.as_deref(), Some("motion"));
                assert!(update.capabilities.is_none());
            }
            StatusPayload::Legacy(_) => panic!("expected structured parse"),
        }
    }

    #[test]
    fn test_status_parse_legacy_string() {
        match StatusPayload::parse(b"online").unwrap() {
            StatusPayload::Legacy(status) => assert_eq!(status, "online"),
            StatusPayload::Structured(_) => panic!("expected legacy parse"),
        }
    }

    #[test]
    fn test_status_parse_rejects_non_utf8() {
        assert!(StatusPayload::parse(&[0xff, 0xfe, 0x80]).is_none());
    }

    #[test]
    fn test_detection_parse_extracts_fields() {
        let payload = json!({
            "event": "motion_start",
            "confidence": 0.91,
            "region": { "x": 1.0, "y": 2.0, "width": 3.0, "height": 4.0 },
            "area_x": 120,
        });
        let event = DetectionEvent::parse(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.event, "motion_start");
        assert_eq!(event.confidence, Some(0.91));
        let region = event.region.unwrap();
        assert_eq!(region.width, 3.0);
        // Raw payload keeps fields we do not model
        assert_eq!(event.raw["area_x"], 120);
    }

    #[test]
    fn test_detection_parse_accepts_max_confidence_alias() {
        let payload = json!({ "event": "face_detected", "max_confidence": 0.7 });
        let event = DetectionEvent::parse(payload.to_string().as_bytes()).unwrap();
        assert_eq!(event.confidence, Some(0.7));
    }

    #[test]
    fn test_detection_parse_requires_event_field() {
        assert!(DetectionEvent::parse(br#"{"confidence":0.5}"#).is_none());
        assert!(DetectionEvent::parse(b"not json").is_none());
        assert!(DetectionEvent::parse(br#""just a string""#).is_none());
    }

    #[test]
    fn test_classify_edges() {
        assert_eq!(
            classify(DetectionKind::Motion, "motion_start"),
            Some(DetectionEdge::Start)
        );
        assert_eq!(
            classify(DetectionKind::Motion, "motion_end"),
            Some(DetectionEdge::End)
        );
        assert_eq!(
            classify(DetectionKind::Face, "face_detected"),
            Some(DetectionEdge::Start)
        );
        assert_eq!(
            classify(DetectionKind::Object, "objects_cleared"),
            Some(DetectionEdge::End)
        );
        // Cross-kind names do not classify
        assert_eq!(classify(DetectionKind::Face, "motion_start"), None);
        assert_eq!(classify(DetectionKind::Motion, "motion_update"), None);
    }

    #[test]
    fn test_kind_from_topic() {
        assert_eq!(kind_from_topic("motion"), Some(DetectionKind::Motion));
        assert_eq!(kind_from_topic("face"), Some(DetectionKind::Face));
        assert_eq!(kind_from_topic("object"), Some(DetectionKind::Object));
        assert_eq!(kind_from_topic("status"), None);
        assert_eq!(kind_from_topic("command"), None);
    }
}
