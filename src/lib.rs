pub mod collectors;
pub mod config;
pub mod error;
pub mod http;
pub mod snapshot;

pub use config::Config;
pub use error::{ProbeStage, TelemetryError};
pub use snapshot::{collect_snapshot, TelemetrySnapshot};
