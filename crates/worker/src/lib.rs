//! In-process notification queue: job store, dispatcher, provider gateway,
//! retry controller and metrics aggregation.

pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod metrics;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod splitter;
pub mod state;
pub mod store;

pub use config::QueueConfig;
pub use error::{CancelError, ConfigError, SubmitError};
pub use gateway::{ProviderError, ProviderGateway, PushProvider};
pub use queue::{Admission, BatchAdmission, BatchOptions, JobOptions, NotificationQueue};
