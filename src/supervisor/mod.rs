use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::recording::{RecordingControl, RecordingOutput};
use crate::registry::CameraRegistry;
use crate::security;
use crate::stream::{ActorLimits, Frame, StreamActor, VideoSource};

/// Composition point for the fleet: owns the registry and the set of live
/// stream actors, and wires discovery decisions to actor lifecycle.
///
/// Invariant: an actor exists for a camera exactly while its record is not
/// offline and has a stream endpoint; discovery drives both sides.
pub struct FleetSupervisor {
    registry: Arc<CameraRegistry>,
    source: Arc<dyn VideoSource>,
    actors: Mutex<HashMap<String, StreamActor>>,
    limits: ActorLimits,
    spool_dir: PathBuf,
    join_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl FleetSupervisor {
    pub fn new(
        config: &Config,
        registry: Arc<CameraRegistry>,
        source: Arc<dyn VideoSource>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            source,
            actors: Mutex::new(HashMap::new()),
            limits: ActorLimits::from(&config.stream),
            spool_dir: config.recording.spool_dir.clone(),
            join_timeout: Duration::from_secs(config.stream.actor_join_timeout_seconds),
            shutdown_tx,
        }
    }

    pub fn registry(&self) -> Arc<CameraRegistry> {
        self.registry.clone()
    }

    /// Receiver the background workers watch for process shutdown.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn actor_count(&self) -> usize {
        self.actors.lock().len()
    }

    pub fn actor_endpoint(&self, camera_id: &str) -> Option<String> {
        self.actors
            .lock()
            .get(camera_id)
            .map(|a| a.endpoint().to_string())
    }

    pub fn actor_retry_count(&self, camera_id: &str) -> Option<u32> {
        self.actors.lock().get(camera_id).map(|a| a.retry_count())
    }

    /// True while an actor task for this camera is still running.
    pub fn has_live_actor(&self, camera_id: &str) -> bool {
        self.actors
            .lock()
            .get(camera_id)
            .map(|a| !a.is_finished())
            .unwrap_or(false)
    }

    /// Copy of the camera's latest frame for viewers and snapshot takers.
    pub fn latest_frame(&self, camera_id: &str) -> Option<Frame> {
        self.actors.lock().get(camera_id).and_then(|a| a.frame())
    }

    /// Liveness signal used to decide whether to serve a placeholder.
    pub fn is_camera_active(&self, camera_id: &str) -> bool {
        self.actors
            .lock()
            .get(camera_id)
            .map(|a| a.is_active())
            .unwrap_or(false)
    }

    /// Start an actor for the camera, replacing any existing one whose
    /// endpoint differs or whose task has already exited (halted actors are
    /// revived this way by a fresh discovery announcement).
    pub async fn ensure_actor(&self, camera_id: &str, endpoint: &str) {
        if self.is_shutting_down() {
            return;
        }

        let stale = {
            let mut actors = self.actors.lock();
            match actors.get(camera_id) {
                Some(actor) if actor.endpoint() == endpoint && !actor.is_finished() => return,
                Some(_) => actors.remove(camera_id),
                None => None,
            }
        };

        if let Some(actor) = stale {
            let endpoint_changed = actor.endpoint() != endpoint;
            if let Some(output) = actor.stop(self.join_timeout).await {
                // Accepted data loss: an endpoint change invalidates the
                // connection mid-recording.
                warn!(
                    "[Supervisor] in-flight recording {} discarded for {} ({} frames)",
                    output.filename, camera_id, output.frames
                );
            }
            self.registry.set_recording(camera_id, false);
            if endpoint_changed {
                info!(
                    "[Supervisor] endpoint changed for {}, restarting stream actor",
                    camera_id
                );
            }
        }

        let actor = StreamActor::spawn(
            camera_id,
            endpoint,
            self.registry.clone(),
            self.source.clone(),
            RecordingControl::new(camera_id, &self.spool_dir),
            self.limits.clone(),
        );
        debug!(
            "[Supervisor] stream actor started for {} against {}",
            camera_id,
            security::mask_endpoint(endpoint)
        );

        let mut actors = self.actors.lock();
        if self.is_shutting_down() {
            actor.request_stop();
            return;
        }
        actors.insert(camera_id.to_string(), actor);
    }

    /// Stop and discard the camera's actor. Returns the output of any
    /// recording that was still in flight.
    pub async fn stop_actor(&self, camera_id: &str) -> Option<RecordingOutput> {
        let actor = self.actors.lock().remove(camera_id)?;
        let output = actor.stop(self.join_timeout).await;
        self.registry.set_recording(camera_id, false);
        info!("[Supervisor] stream actor stopped for {}", camera_id);
        output
    }

    pub fn start_recording(&self, camera_id: &str) -> crate::Result<String> {
        let filename = {
            let actors = self.actors.lock();
            let actor = actors
                .get(camera_id)
                .ok_or_else(|| crate::FleetError::CameraNotFound(camera_id.to_string()))?;
            actor.start_recording()?
        };
        self.registry.set_recording(camera_id, true);
        Ok(filename)
    }

    pub fn stop_recording(&self, camera_id: &str) -> crate::Result<RecordingOutput> {
        let output = {
            let actors = self.actors.lock();
            let actor = actors
                .get(camera_id)
                .ok_or_else(|| crate::FleetError::CameraNotFound(camera_id.to_string()))?;
            actor.stop_recording()?
        };
        self.registry.set_recording(camera_id, false);
        Ok(output)
    }

    /// Process-wide graceful shutdown: signal the background workers, then
    /// stop every actor with a capped join. A camera worker that does not
    /// exit in time is abandoned rather than allowed to block exit.
    pub async fn shutdown(&self) {
        info!("Shutting down fleet supervisor");
        let _ = self.shutdown_tx.send(true);

        let actors: Vec<(String, StreamActor)> = self.actors.lock().drain().collect();
        for (camera_id, actor) in actors {
            if let Some(output) = actor.stop(self.join_timeout).await {
                info!(
                    "[Supervisor] recording {} flushed during shutdown ({} frames)",
                    output.filename, output.frames
                );
            }
            self.registry.set_recording(&camera_id, false);
            debug!("[Supervisor] stopped actor for {}", camera_id);
        }

        info!("Fleet supervisor stopped");
    }
}

impl std::fmt::Debug for FleetSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetSupervisor")
            .field("actors", &self.actor_count())
            .field("cameras", &self.registry.len())
            .finish()
    }
}
