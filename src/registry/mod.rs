use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;

use crate::alerts::DetectionKind;

/// Entries kept per detection history ring.
pub const EVENT_HISTORY_CAPACITY: usize = 100;

/// Status a camera is marked with when it disappears from the network.
pub const STATUS_OFFLINE: &str = "offline";

/// One retained detection payload.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub payload: Value,
    pub received: DateTime<Utc>,
}

/// Fixed-capacity event history; the oldest entry is evicted when full.
#[derive(Debug, Clone, Serialize)]
pub struct EventRing {
    entries: VecDeque<EventRecord>,
    capacity: usize,
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, payload: Value) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(EventRecord {
            payload,
            received: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&EventRecord> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.entries.iter()
    }
}

impl Default for EventRing {
    fn default() -> Self {
        Self::new(EVENT_HISTORY_CAPACITY)
    }
}

/// Everything the command center knows about one camera.
#[derive(Debug, Clone, Serialize)]
pub struct CameraRecord {
    pub camera_id: String,
    pub name: String,
    pub node_type: String,
    pub capabilities: Vec<String>,
    pub ip: Option<IpAddr>,
    pub port: u16,
    pub stream_url: String,
    pub mqtt_port: u16,
    pub status: String,
    pub last_seen: DateTime<Utc>,
    pub recording: bool,
    pub motion_active: bool,
    pub face_active: bool,
    pub objects_active: bool,
    pub motion_events: EventRing,
    pub face_events: EventRing,
    pub object_events: EventRing,
    /// Service name of the announcement that produced this record, used to
    /// correlate a later removal back to it.
    pub source_name: String,
    pub discovered_via: String,
}

impl CameraRecord {
    pub fn new(camera_id: impl Into<String>, stream_url: impl Into<String>) -> Self {
        let camera_id = camera_id.into();
        Self {
            name: format!("Camera {}", camera_id),
            camera_id,
            node_type: "unknown".to_string(),
            capabilities: vec!["streaming".to_string()],
            ip: None,
            port: 0,
            stream_url: stream_url.into(),
            mqtt_port: 8883,
            status: "discovered".to_string(),
            last_seen: Utc::now(),
            recording: false,
            motion_active: false,
            face_active: false,
            objects_active: false,
            motion_events: EventRing::default(),
            face_events: EventRing::default(),
            object_events: EventRing::default(),
            source_name: String::new(),
            discovered_via: "manual".to_string(),
        }
    }

    fn events_mut(&mut self, kind: DetectionKind) -> &mut EventRing {
        match kind {
            DetectionKind::Motion => &mut self.motion_events,
            DetectionKind::Face => &mut self.face_events,
            DetectionKind::Object => &mut self.object_events,
        }
    }

    pub fn events(&self, kind: DetectionKind) -> &EventRing {
        match kind {
            DetectionKind::Motion => &self.motion_events,
            DetectionKind::Face => &self.face_events,
            DetectionKind::Object => &self.object_events,
        }
    }

    pub fn detection_active(&self, kind: DetectionKind) -> bool {
        match kind {
            DetectionKind::Motion => self.motion_active,
            DetectionKind::Face => self.face_active,
            DetectionKind::Object => self.objects_active,
        }
    }
}

/// Partial update applied through [`CameraRegistry::update`].
#[derive(Debug, Clone, Default)]
pub struct CameraPatch {
    pub status: Option<String>,
    pub name: Option<String>,
    pub node_type: Option<String>,
    pub capabilities: Option<Vec<String>>,
    pub recording: Option<bool>,
    /// Refresh last_seen to now.
    pub touch: bool,
}

impl CameraPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn node_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }

    pub fn capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn recording(mut self, recording: bool) -> Self {
        self.recording = Some(recording);
        self
    }

    pub fn touch(mut self) -> Self {
        self.touch = true;
        self
    }
}

/// Shared camera registry.
///
/// All mutation goes through this API under one coarse lock; updates are O(1)
/// and never perform I/O, so contention stays negligible. Frame traffic never
/// touches this lock.
#[derive(Debug, Default)]
pub struct CameraRegistry {
    cameras: Mutex<HashMap<String, CameraRecord>>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for a camera.
    ///
    /// The most recently resolved announcement always wins over previously
    /// cached state for the same camera id.
    pub fn upsert(&self, record: CameraRecord) {
        self.cameras
            .lock()
            .insert(record.camera_id.clone(), record);
    }

    pub fn get(&self, camera_id: &str) -> Option<CameraRecord> {
        self.cameras.lock().get(camera_id).cloned()
    }

    pub fn remove(&self, camera_id: &str) -> Option<CameraRecord> {
        self.cameras.lock().remove(camera_id)
    }

    pub fn contains(&self, camera_id: &str) -> bool {
        self.cameras.lock().contains_key(camera_id)
    }

    pub fn len(&self) -> usize {
        self.cameras.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.lock().is_empty()
    }

    /// Apply a partial update. Returns false when the camera is unknown.
    pub fn update(&self, camera_id: &str, patch: CameraPatch) -> bool {
        let mut cameras = self.cameras.lock();
        let Some(record) = cameras.get_mut(camera_id) else {
            return false;
        };
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(name) = patch.name {
            record.name = name;
        }
        if let Some(node_type) = patch.node_type {
            record.node_type = node_type;
        }
        if let Some(capabilities) = patch.capabilities {
            record.capabilities = capabilities;
        }
        if let Some(recording) = patch.recording {
            record.recording = recording;
        }
        if patch.touch {
            record.last_seen = Utc::now();
        }
        true
    }

    /// Copy of all records, safe to hand to concurrent readers.
    pub fn snapshot(&self) -> Vec<CameraRecord> {
        let cameras = self.cameras.lock();
        let mut records: Vec<CameraRecord> = cameras.values().cloned().collect();
        records.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        records
    }

    pub fn mark_offline(&self, camera_id: &str) -> bool {
        self.update(camera_id, CameraPatch::new().status(STATUS_OFFLINE))
    }

    pub fn is_offline(&self, camera_id: &str) -> bool {
        self.cameras
            .lock()
            .get(camera_id)
            .map(|r| r.status == STATUS_OFFLINE)
            .unwrap_or(false)
    }

    /// Locate a camera by the discovery source name that announced it.
    pub fn find_by_source_name(&self, source_name: &str) -> Option<String> {
        self.cameras
            .lock()
            .values()
            .find(|r| r.source_name == source_name)
            .map(|r| r.camera_id.clone())
    }

    /// Append a detection payload to the camera's history ring.
    pub fn push_event(&self, camera_id: &str, kind: DetectionKind, payload: Value) -> bool {
        let mut cameras = self.cameras.lock();
        let Some(record) = cameras.get_mut(camera_id) else {
            return false;
        };
        record.events_mut(kind).push(payload);
        true
    }

    pub fn set_detection_active(&self, camera_id: &str, kind: DetectionKind, active: bool) -> bool {
        let mut cameras = self.cameras.lock();
        let Some(record) = cameras.get_mut(camera_id) else {
            return false;
        };
        match kind {
            DetectionKind::Motion => record.motion_active = active,
            DetectionKind::Face => record.face_active = active,
            DetectionKind::Object => record.objects_active = active,
        }
        true
    }

    pub fn set_recording(&self, camera_id: &str, recording: bool) -> bool {
        self.update(camera_id, CameraPatch::new().recording(recording))
    }
}
