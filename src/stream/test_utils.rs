use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use super::source::{Frame, SourceError, VideoConnection, VideoSource};

/// What one connect attempt against a [`ScriptedSource`] does.
pub enum ConnectOutcome {
    /// Connect fails.
    Fail,
    /// Connect never completes.
    Pend,
    /// Connect succeeds and reads follow the given script.
    Serve(Vec<ReadOutcome>),
}

/// What one frame read against a scripted connection does.
pub enum ReadOutcome {
    Frame { data: Vec<u8>, keyframe: bool },
    Fail,
    /// Read never completes; keeps the actor parked in its frame loop.
    Pend,
}

pub fn frame(data: &[u8]) -> ReadOutcome {
    ReadOutcome::Frame {
        data: data.to_vec(),
        keyframe: false,
    }
}

/// Deterministic video source driven by a per-connect script. Once the
/// connect script is exhausted, further attempts fail; once a read script is
/// exhausted, further reads fail (connection lost).
pub struct ScriptedSource {
    connects: Mutex<VecDeque<ConnectOutcome>>,
    connect_attempts: AtomicU32,
    /// When set, each read waits for one permit before resolving, letting a
    /// test pace the frame loop.
    pacing: Option<Arc<Semaphore>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<ConnectOutcome>) -> Self {
        Self {
            connects: Mutex::new(script.into()),
            connect_attempts: AtomicU32::new(0),
            pacing: None,
        }
    }

    pub fn paced(script: Vec<ConnectOutcome>, pacing: Arc<Semaphore>) -> Self {
        Self {
            connects: Mutex::new(script.into()),
            connect_attempts: AtomicU32::new(0),
            pacing: Some(pacing),
        }
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoSource for ScriptedSource {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn VideoConnection>, SourceError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self.connects.lock().pop_front();
        match outcome {
            None | Some(ConnectOutcome::Fail) => {
                Err(SourceError::Connect(format!("scripted failure: {}", endpoint)))
            }
            Some(ConnectOutcome::Pend) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Some(ConnectOutcome::Serve(reads)) => Ok(Box::new(ScriptedConnection {
                reads: reads.into(),
                pacing: self.pacing.clone(),
            })),
        }
    }
}

struct ScriptedConnection {
    reads: VecDeque<ReadOutcome>,
    pacing: Option<Arc<Semaphore>>,
}

#[async_trait]
impl VideoConnection for ScriptedConnection {
    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        if let Some(pacing) = &self.pacing {
            // Permits are never returned; each one releases one read.
            pacing.acquire().await.expect("pacing semaphore closed").forget();
        }
        match self.reads.pop_front() {
            None | Some(ReadOutcome::Fail) => Err(SourceError::Read("scripted failure".into())),
            Some(ReadOutcome::Pend) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Some(ReadOutcome::Frame { data, keyframe }) => Ok(Frame {
                data: Bytes::from(data),
                keyframe,
                received: Instant::now(),
            }),
        }
    }
}
