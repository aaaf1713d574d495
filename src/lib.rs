pub mod alerts;
pub mod config;
pub mod discovery;
pub mod recording;
pub mod recovery;
pub mod registry;
pub mod security;
pub mod stream;
pub mod supervisor;
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use registry::CameraRegistry;
pub use supervisor::FleetSupervisor;

// Common error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Camera not found: {0}")]
    CameraNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Discovery error: {0}")]
    DiscoveryError(String),

    #[error("Broker error: {0}")]
    BrokerError(String),

    #[error("Invalid stream endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Recording error: {0}")]
    RecordingError(#[from] recording::RecordingError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;
