pub mod config;
pub mod error;
pub mod normalize;
pub mod types;

pub use config::{GenerationSettings, Secrets};
pub use error::{is_cancellation, Cancelled, ConfigError, ErrorKind, GenerationError};
pub use normalize::{extract_domain, normalize_query, normalize_url};
pub use types::*;
