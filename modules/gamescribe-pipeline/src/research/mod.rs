pub mod pool;
pub mod routing;
pub mod scheduler;

pub use pool::{extract_research_for_queries, ResearchPool, ResearchPoolBuilder};
pub use routing::{is_semantic_query, Lane, QueryRouter};
pub use scheduler::{FailedQuery, ResearchOutcome, ResearchQuery, ResearchScheduler};
