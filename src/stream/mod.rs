use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

pub mod source;
#[cfg(test)]
pub mod test_utils;

pub use source::{Frame, RtspSource, SourceError, VideoConnection, VideoSource};

use crate::recording::{RecordingControl, RecordingError, RecordingOutput, RecordingStatus};
use crate::recovery::BackoffStrategy;
use crate::registry::CameraRegistry;
use crate::security;

/// Pause between failed frame reads, matching a 30fps cadence.
const READ_FAILURE_PAUSE: Duration = Duration::from_millis(33);

/// Pause before reconnecting after an established connection drops.
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// A camera counts as live only while frames are this fresh.
const FRAME_FRESHNESS: Duration = Duration::from_secs(2);

const CONNECT_BACKOFF_BASE: Duration = Duration::from_secs(5);
const CONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Retry ceiling reached; terminal until a fresh discovery announcement
    /// recreates the actor.
    Halted,
}

#[derive(Debug, Clone)]
pub struct ActorLimits {
    /// Connect attempts before the actor halts permanently.
    pub max_connect_retries: u32,
    /// Consecutive read failures before the connection is dropped.
    pub max_read_failures: u32,
}

impl Default for ActorLimits {
    fn default() -> Self {
        Self {
            max_connect_retries: 60,
            max_read_failures: 30,
        }
    }
}

impl From<&crate::config::StreamConfig> for ActorLimits {
    fn from(config: &crate::config::StreamConfig) -> Self {
        Self {
            max_connect_retries: config.max_connect_retries,
            max_read_failures: config.max_read_failures,
        }
    }
}

struct ActorShared {
    camera_id: String,
    endpoint: String,
    limits: ActorLimits,
    state: Mutex<ConnectionState>,
    /// Most recently decoded frame; one writer (the actor loop), any number
    /// of copying readers.
    frame: Mutex<Option<Frame>>,
    retry_count: AtomicU32,
    stop: AtomicBool,
    stop_notify: Notify,
    recording: RecordingControl,
}

impl ActorShared {
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn is_active(&self) -> bool {
        self.state() == ConnectionState::Connected
            && self
                .frame
                .lock()
                .as_ref()
                .map(|f| f.age() < FRAME_FRESHNESS)
                .unwrap_or(false)
    }

    /// Sleep that a stop request cuts short.
    async fn pause(&self, duration: Duration) {
        if self.stop_requested() {
            return;
        }
        tokio::select! {
            _ = sleep(duration) => {}
            _ = self.stop_notify.notified() => {}
        }
    }
}

/// One persistent stream worker per camera.
///
/// Owns its pull connection and frame slot; retries with linear capped
/// backoff; halts permanently once the retry ceiling is reached. The struct
/// itself is the handle other components hold; the loop runs as a spawned
/// task.
pub struct StreamActor {
    shared: Arc<ActorShared>,
    join: JoinHandle<()>,
}

impl StreamActor {
    pub fn spawn(
        camera_id: impl Into<String>,
        endpoint: impl Into<String>,
        registry: Arc<CameraRegistry>,
        source: Arc<dyn VideoSource>,
        recording: RecordingControl,
        limits: ActorLimits,
    ) -> Self {
        let shared = Arc::new(ActorShared {
            camera_id: camera_id.into(),
            endpoint: endpoint.into(),
            limits,
            state: Mutex::new(ConnectionState::Disconnected),
            frame: Mutex::new(None),
            retry_count: AtomicU32::new(0),
            stop: AtomicBool::new(false),
            stop_notify: Notify::new(),
            recording,
        });

        let join = tokio::spawn(run(shared.clone(), registry, source));
        Self { shared, join }
    }

    pub fn camera_id(&self) -> &str {
        &self.shared.camera_id
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn retry_count(&self) -> u32 {
        self.shared.retry_count.load(Ordering::SeqCst)
    }

    /// Copy of the most recent frame, safe to call from any reader.
    pub fn frame(&self) -> Option<Frame> {
        self.shared.frame.lock().clone()
    }

    /// Live only while Connected with a frame captured in the last 2s.
    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    pub fn start_recording(&self) -> Result<String, RecordingError> {
        let latest = self.shared.frame.lock().clone();
        self.shared.recording.start(latest.as_ref())
    }

    pub fn stop_recording(&self) -> Result<RecordingOutput, RecordingError> {
        self.shared.recording.stop()
    }

    pub fn recording_status(&self) -> RecordingStatus {
        self.shared.recording.status()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.stop_notify.notify_waiters();
    }

    /// Stop the actor. Any active recording is stopped first and its output
    /// returned. Waits up to `join_timeout` for the loop to exit, then
    /// aborts it; a camera worker must never block shutdown.
    pub async fn stop(self, join_timeout: Duration) -> Option<RecordingOutput> {
        let output = match self.shared.recording.stop() {
            Ok(output) => {
                info!(
                    "[Camera {}] recording {} flushed on stop ({} frames)",
                    self.shared.camera_id, output.filename, output.frames
                );
                Some(output)
            }
            Err(RecordingError::NotRecording) => None,
            Err(e) => {
                warn!(
                    "[Camera {}] could not flush recording on stop: {}",
                    self.shared.camera_id, e
                );
                None
            }
        };

        self.request_stop();

        let mut join = self.join;
        if timeout(join_timeout, &mut join).await.is_err() {
            warn!(
                "[Camera {}] did not stop within {:?}, aborting",
                self.shared.camera_id, join_timeout
            );
            join.abort();
        }

        output
    }
}

impl std::fmt::Debug for StreamActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamActor")
            .field("camera_id", &self.shared.camera_id)
            .field("endpoint", &security::mask_endpoint(&self.shared.endpoint))
            .field("state", &self.shared.state())
            .field("retry_count", &self.retry_count())
            .finish()
    }
}

async fn run(
    shared: Arc<ActorShared>,
    registry: Arc<CameraRegistry>,
    source: Arc<dyn VideoSource>,
) {
    let mut backoff =
        BackoffStrategy::linear(CONNECT_BACKOFF_BASE, CONNECT_BACKOFF_MAX).with_jitter(false);

    info!("[Camera {}] stream actor started", shared.camera_id);

    loop {
        if shared.stop_requested() {
            break;
        }
        if registry.is_offline(&shared.camera_id) {
            info!(
                "[Camera {}] camera offline, stopping reconnection attempts",
                shared.camera_id
            );
            break;
        }
        if shared.retry_count.load(Ordering::SeqCst) >= shared.limits.max_connect_retries {
            warn!(
                "[Camera {}] max retries reached, halting",
                shared.camera_id
            );
            shared.set_state(ConnectionState::Halted);
            // Halted is terminal: no further attempts, no further state
            // changes until the actor is recreated.
            return;
        }

        shared.set_state(ConnectionState::Connecting);
        match source.connect(&shared.endpoint).await {
            Err(e) => {
                let attempt = shared.retry_count.fetch_add(1, Ordering::SeqCst) + 1;
                shared.set_state(ConnectionState::Disconnected);
                let delay = backoff.next_delay();
                warn!(
                    "[Camera {}] failed to connect (attempt {}/{}): {}, retrying in {:?}",
                    shared.camera_id, attempt, shared.limits.max_connect_retries, e, delay
                );
                shared.pause(delay).await;
            }
            Ok(mut connection) => {
                shared.retry_count.store(0, Ordering::SeqCst);
                backoff.reset();
                shared.set_state(ConnectionState::Connected);
                info!(
                    "[Camera {}] connected to {}",
                    shared.camera_id,
                    security::mask_endpoint(&shared.endpoint)
                );

                let mut consecutive_failures = 0u32;
                while !shared.stop_requested()
                    && consecutive_failures < shared.limits.max_read_failures
                {
                    match connection.next_frame().await {
                        Ok(frame) => {
                            consecutive_failures = 0;
                            *shared.frame.lock() = Some(frame.clone());
                            shared.recording.write_frame(&frame);
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            debug!(
                                "[Camera {}] frame read failed ({}/{}): {}",
                                shared.camera_id,
                                consecutive_failures,
                                shared.limits.max_read_failures,
                                e
                            );
                            shared.pause(READ_FAILURE_PAUSE).await;
                        }
                    }
                }

                drop(connection);
                shared.set_state(ConnectionState::Disconnected);
                if !shared.stop_requested() {
                    shared.retry_count.fetch_add(1, Ordering::SeqCst);
                    info!("[Camera {}] connection lost, reconnecting", shared.camera_id);
                    shared.pause(RECONNECT_PAUSE).await;
                }
            }
        }
    }

    shared.set_state(ConnectionState::Disconnected);
    info!("[Camera {}] stream actor stopped", shared.camera_id);
}
