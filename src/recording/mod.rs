use chrono::Local;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::stream::source::Frame;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("Already recording")]
    AlreadyRecording,
    #[error("Not recording")]
    NotRecording,
    #[error("No frame available to size the recording")]
    NoFrame,
    #[error("Recording sink error: {0}")]
    Sink(#[from] std::io::Error),
}

/// Everything a finished recording hands back to the caller. The encoded
/// bytes go to the media store collaborator; nothing is persisted here.
#[derive(Clone)]
pub struct RecordingOutput {
    pub filename: String,
    pub frames: u64,
    pub duration: Duration,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for RecordingOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingOutput")
            .field("filename", &self.filename)
            .field("frames", &self.frames)
            .field("duration", &self.duration)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordingStatus {
    Idle,
    Recording {
        filename: String,
        frames: u64,
        duration: Duration,
    },
}

struct ActiveRecording {
    filename: String,
    spool_path: PathBuf,
    writer: BufWriter<File>,
    started: Instant,
    frames: u64,
}

/// Per-camera recording state.
///
/// Serialized by its own lock, independent of the connection state machine,
/// so a reconnect can never corrupt an in-progress recording. Frames are
/// spooled as length-delimited encoded pictures and read back on stop.
pub struct RecordingControl {
    camera_id: String,
    spool_dir: PathBuf,
    active: Mutex<Option<ActiveRecording>>,
}

impl RecordingControl {
    pub fn new(camera_id: impl Into<String>, spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            camera_id: camera_id.into(),
            spool_dir: spool_dir.into(),
            active: Mutex::new(None),
        }
    }

    /// Begin recording. Requires at least one captured frame; fails without
    /// leaving partial state behind.
    pub fn start(&self, latest_frame: Option<&Frame>) -> Result<String, RecordingError> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }
        if latest_frame.is_none() {
            return Err(RecordingError::NoFrame);
        }

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let filename = format!("{}_{}.fvs", self.camera_id, stamp);
        fs::create_dir_all(&self.spool_dir)?;
        let spool_path = self.spool_dir.join(&filename);
        let writer = BufWriter::new(File::create(&spool_path)?);

        info!(
            "[Recording] Started: {} (spool: {:?})",
            filename, spool_path
        );

        *active = Some(ActiveRecording {
            filename: filename.clone(),
            spool_path,
            writer,
            started: Instant::now(),
            frames: 0,
        });

        Ok(filename)
    }

    /// Append one frame to the active recording; no-op while idle.
    pub fn write_frame(&self, frame: &Frame) {
        let mut active = self.active.lock();
        let Some(recording) = active.as_mut() else {
            return;
        };

        let len = frame.data.len() as u32;
        let result = recording
            .writer
            .write_all(&len.to_be_bytes())
            .and_then(|_| recording.writer.write_all(&[frame.keyframe as u8]))
            .and_then(|_| recording.writer.write_all(&frame.data));

        match result {
            Ok(()) => recording.frames += 1,
            Err(e) => error!(
                "[Recording] Write failed for {}: {}",
                recording.filename, e
            ),
        }
    }

    /// Stop recording and return the spooled output. The spool file is
    /// deleted once its contents have been read back.
    pub fn stop(&self) -> Result<RecordingOutput, RecordingError> {
        let mut active = self.active.lock();
        let Some(mut recording) = active.take() else {
            return Err(RecordingError::NotRecording);
        };

        recording.writer.flush()?;
        drop(recording.writer);

        let data = fs::read(&recording.spool_path)?;
        if let Err(e) = fs::remove_file(&recording.spool_path) {
            warn!(
                "[Recording] Could not remove spool file {:?}: {}",
                recording.spool_path, e
            );
        }

        let duration = recording.started.elapsed();
        info!(
            "[Recording] Stopped: {} ({} frames, {:.1}s, {} bytes)",
            recording.filename,
            recording.frames,
            duration.as_secs_f64(),
            data.len()
        );

        Ok(RecordingOutput {
            filename: recording.filename,
            frames: recording.frames,
            duration,
            data,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn status(&self) -> RecordingStatus {
        match self.active.lock().as_ref() {
            None => RecordingStatus::Idle,
            Some(recording) => RecordingStatus::Recording {
                filename: recording.filename.clone(),
                frames: recording.frames,
                duration: recording.started.elapsed(),
            },
        }
    }
}

impl std::fmt::Debug for RecordingControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingControl")
            .field("camera_id", &self.camera_id)
            .field("recording", &self.is_recording())
            .finish()
    }
}
