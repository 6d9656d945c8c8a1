pub mod error;
pub mod exa;
pub mod tavily;
pub mod types;

pub use error::{Result, SearchError};
pub use exa::ExaClient;
pub use tavily::TavilyClient;
pub use types::{ProviderKind, SearchDepth, SearchHit, SearchOptions, SearchResponse};
