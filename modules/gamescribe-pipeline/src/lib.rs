pub mod agents;
pub mod article;
pub mod context;
pub mod infra;
pub mod pipeline;
pub mod research;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod usage;
pub mod writing;

pub use article::{
    ArticleDraft, ArticlePlan, DraftSection, FixStrategy, PlanSection, ReviewIssue, ReviewResult,
    Severity, SourceRef,
};
pub use context::GenerationContext;
pub use infra::{retry_with_backoff, RetryPolicy};
pub use pipeline::{GeneratedArticle, Pipeline, PipelineDeps, ResearchSummary};
pub use research::{
    extract_research_for_queries, ResearchOutcome, ResearchPool, ResearchPoolBuilder,
    ResearchQuery, ResearchScheduler,
};
pub use traits::{Clock, LanguageModel, NoopProgress, ProgressReporter, SystemClock, WebSearcher};
pub use usage::{RunMetrics, Stage, StageMetrics, UsageMeter};
