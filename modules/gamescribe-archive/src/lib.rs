pub mod cleaner;
pub mod domain_quality;
pub mod engine;
pub mod error;
pub mod exclusion;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;
pub mod writer;

pub use cleaner::{CleanRequest, CleanedContent, ContentCleaner};
pub use domain_quality::compute_domain_quality;
pub use engine::{classify, CacheLookup, CacheStats, CleanOutcome, SourceCache};
pub use error::{ArchiveError, Result};
pub use exclusion::{ExclusionReason, ExclusionSet};
pub use memory::MemorySourceStore;
pub use model::{
    DomainAggregate, DomainQuality, DomainTier, NewSourceContent, ProviderCounts, ProviderStats,
    StoredSourceContent,
};
pub use postgres::PgSourceStore;
pub use store::SourceStore;
pub use writer::{refresh_domain, BackgroundWriter, WriteJob, WriteQueue};
