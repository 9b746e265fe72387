pub mod config;
pub mod digest;
pub mod error;
pub mod types;
pub mod validate;

pub use error::ValidationError;
