pub mod cleaner;
pub mod editor;
pub mod fixer;
pub mod prompts;
pub mod reviewer;
pub mod scout;

pub use cleaner::LlmContentCleaner;
pub use editor::{validate_plan, Editor};
pub use fixer::{FixOutcome, Fixer};
pub use reviewer::Reviewer;
pub use scout::{scout_queries, Scout, ScoutReport};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use ai_client::StructuredOutput;

use crate::infra::{cancellable, retry_with_backoff, RetryPolicy};
use crate::traits::{GenerateRequest, LanguageModel};
use crate::usage::UsageMeter;

// ---------------------------------------------------------------------------
// Shared call helpers: retry, cancellation and metering in one place.
// ---------------------------------------------------------------------------

pub(crate) async fn generate_text(
    model: &dyn LanguageModel,
    request: &GenerateRequest,
    retry: &RetryPolicy,
    token: Option<&CancellationToken>,
    meter: &UsageMeter,
) -> Result<String> {
    let label = format!("{} generation", request.agent);
    let generation = retry_with_backoff(retry, token, Some(&label), || async {
        match token {
            Some(token) => cancellable(token, model.generate_text(request)).await,
            None => model.generate_text(request).await,
        }
    })
    .await?;
    meter.record(generation.usage, generation.cost_usd);
    Ok(generation.text)
}

pub(crate) async fn generate_value(
    model: &dyn LanguageModel,
    request: &GenerateRequest,
    schema: &serde_json::Value,
    retry: &RetryPolicy,
    token: Option<&CancellationToken>,
    meter: &UsageMeter,
) -> Result<serde_json::Value> {
    let label = format!("{} generation", request.agent);
    let generation = retry_with_backoff(retry, token, Some(&label), || async {
        match token {
            Some(token) => cancellable(token, model.generate_object(request, schema.clone())).await,
            None => model.generate_object(request, schema.clone()).await,
        }
    })
    .await?;
    meter.record(generation.usage, generation.cost_usd);
    Ok(generation.value)
}

pub(crate) async fn generate_typed<T: StructuredOutput>(
    model: &dyn LanguageModel,
    request: &GenerateRequest,
    retry: &RetryPolicy,
    token: Option<&CancellationToken>,
    meter: &UsageMeter,
) -> Result<T> {
    let value = generate_value(model, request, &T::tool_schema(), retry, token, meter).await?;
    serde_json::from_value(value)
        .with_context(|| format!("{} returned an invalid {}", request.agent, T::type_name()))
}
