pub mod claude;
pub mod error;
pub mod pricing;
pub mod schema;
pub mod util;

pub use claude::{Claude, Completion, CompletionRequest, Extraction, Usage};
pub use error::{AiError, Result};
pub use pricing::estimate_cost_usd;
pub use schema::StructuredOutput;
pub use util::{strip_code_blocks, tail_chars, truncate_chars};
