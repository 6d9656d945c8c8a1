use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::types::ArticleCategory;

// ---------------------------------------------------------------------------
// Secrets (environment)
// ---------------------------------------------------------------------------

/// Credentials and connection strings. Loaded from the environment (and a
/// `.env` file when present); never from the settings file.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub anthropic_api_key: String,
    pub tavily_api_key: String,
    /// Semantic search is unavailable without it.
    pub exa_api_key: Option<String>,
    /// In-memory source cache without it.
    pub database_url: Option<String>,
}

impl Secrets {
    /// Load secrets, reporting every missing required key at once.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let anthropic = get("ANTHROPIC_API_KEY");
        let tavily = get("TAVILY_API_KEY");

        let mut missing = Vec::new();
        if anthropic.is_none() {
            missing.push("ANTHROPIC_API_KEY".to_string());
        }
        if tavily.is_none() {
            missing.push("TAVILY_API_KEY".to_string());
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingCredentials(missing));
        }

        Ok(Self {
            anthropic_api_key: anthropic.unwrap_or_default(),
            tavily_api_key: tavily.unwrap_or_default(),
            exa_api_key: get("EXA_API_KEY"),
            database_url: get("DATABASE_URL"),
        })
    }

    /// Log which optional capabilities are configured, never the values.
    pub fn log_redacted(&self) {
        info!(
            anthropic = "set",
            tavily = "set",
            exa = if self.exa_api_key.is_some() { "set" } else { "unset" },
            database = if self.database_url.is_some() { "set" } else { "unset" },
            "Secrets loaded"
        );
    }
}

// ---------------------------------------------------------------------------
// Settings (TOML, all defaulted)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationSettings {
    pub models: ModelSettings,
    pub research: ResearchSettings,
    pub retry: RetrySettings,
    pub cache: CacheSettings,
    pub domains: DomainSettings,
    pub writing: WritingSettings,
    pub editor: EditorSettings,
    pub fixer: FixerSettings,
    /// Whole-run deadline in seconds.
    pub timeout_secs: u64,
    /// Maximum entries in the trailing source list.
    pub max_sources: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            models: ModelSettings::default(),
            research: ResearchSettings::default(),
            retry: RetrySettings::default(),
            cache: CacheSettings::default(),
            domains: DomainSettings::default(),
            writing: WritingSettings::default(),
            editor: EditorSettings::default(),
            fixer: FixerSettings::default(),
            timeout_secs: 600,
            max_sources: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSettings {
    pub scout: String,
    pub editor: String,
    pub specialist: String,
    pub reviewer: String,
    pub fixer: String,
    pub cleaner: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        let sonnet = "claude-sonnet-4-20250514".to_string();
        Self {
            scout: "claude-haiku-4-5".to_string(),
            editor: sonnet.clone(),
            specialist: sonnet.clone(),
            reviewer: sonnet.clone(),
            fixer: sonnet,
            cleaner: "claude-haiku-4-5".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResearchSettings {
    /// Queries issued concurrently within one batch.
    pub concurrency: usize,
    /// Courtesy pause between batches.
    pub batch_delay_ms: u64,
    pub max_results_per_query: u32,
    pub advanced_depth: bool,
    pub include_answer: bool,
    /// Categories whose "how/why" queries go to the semantic provider.
    pub semantic_routing_categories: Vec<ArticleCategory>,
    /// Fallback per-call cost when a provider does not report one.
    pub keyword_cost_basic_usd: f64,
    pub keyword_cost_advanced_usd: f64,
    pub semantic_cost_usd: f64,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            concurrency: 3,
            batch_delay_ms: 250,
            max_results_per_query: 5,
            advanced_depth: true,
            include_answer: true,
            semantic_routing_categories: vec![ArticleCategory::Guide, ArticleCategory::Review],
            keyword_cost_basic_usd: 0.008,
            keyword_cost_advanced_usd: 0.016,
            semantic_cost_usd: 0.005,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Thresholds for surfacing and storing cleaned sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Raw content below this many characters is never sent to the cleaner.
    pub min_scrape_chars: usize,
    pub display_min_relevance: u8,
    pub display_min_quality: u8,
    pub storage_min_relevance: u8,
    pub storage_min_quality: u8,
    /// Relevance assumed for rows cleaned before relevance scoring existed.
    pub legacy_default_relevance: u8,
    /// Raw content handed to the cleaner is capped at this many bytes.
    pub max_clean_input_chars: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_scrape_chars: 200,
            display_min_relevance: 50,
            display_min_quality: 40,
            storage_min_relevance: 30,
            storage_min_quality: 20,
            legacy_default_relevance: 60,
            max_clean_input_chars: 24_000,
        }
    }
}

/// Domain aggregate tiers and auto-exclusion rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DomainSettings {
    pub tier_excellent_min: f64,
    pub tier_good_min: f64,
    pub tier_average_min: f64,
    pub exclude_quality_below: f64,
    pub min_quality_samples: u32,
    pub exclude_relevance_below: f64,
    pub min_relevance_samples: u32,
    pub min_provider_attempts: u32,
    pub max_provider_failure_rate: f64,
    /// Hosts never fetched or cleaned, in addition to learned exclusions.
    pub static_exclusions: Vec<String>,
}

impl Default for DomainSettings {
    fn default() -> Self {
        Self {
            tier_excellent_min: 80.0,
            tier_good_min: 65.0,
            tier_average_min: 45.0,
            exclude_quality_below: 30.0,
            min_quality_samples: 5,
            exclude_relevance_below: 25.0,
            min_relevance_samples: 3,
            min_provider_attempts: 4,
            max_provider_failure_rate: 0.6,
            static_exclusions: [
                "youtube.com",
                "youtu.be",
                "tiktok.com",
                "instagram.com",
                "facebook.com",
                "twitter.com",
                "x.com",
                "pinterest.com",
                "amazon.com",
                "ebay.com",
                "twitch.tv",
            ]
            .iter()
            .map(|d| d.to_string())
            .collect(),
        }
    }
}

/// Section pacing and context carry-over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WritingSettings {
    pub words_per_paragraph: u32,
    pub paragraph_lower_offset: u32,
    pub paragraph_upper_offset: u32,
    pub min_paragraphs: u32,
    pub max_paragraphs: u32,
    pub previous_tail_chars: usize,
    pub thin_research_chars: usize,
    /// Research text attached to one section is capped at this many bytes.
    pub max_research_chars: usize,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for WritingSettings {
    fn default() -> Self {
        Self {
            words_per_paragraph: 90,
            paragraph_lower_offset: 1,
            paragraph_upper_offset: 1,
            min_paragraphs: 2,
            max_paragraphs: 8,
            previous_tail_chars: 600,
            thin_research_chars: 1_500,
            max_research_chars: 16_000,
            max_output_tokens: 2_500,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EditorSettings {
    pub min_sections: usize,
    pub max_sections: usize,
    pub min_queries_per_section: usize,
    pub max_queries_per_section: usize,
    /// Extra attempts after the first when the plan fails validation.
    pub max_retries: u32,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            min_sections: 3,
            max_sections: 10,
            min_queries_per_section: 1,
            max_queries_per_section: 5,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FixerSettings {
    pub max_iterations: u32,
    /// Hard cap while critical issues remain open.
    pub max_critical_iterations: u32,
}

impl Default for FixerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 2,
            max_critical_iterations: 4,
        }
    }
}

impl GenerationSettings {
    /// Load settings from a TOML file (or defaults when `path` is `None`) and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => GenerationSettings::default(),
        };
        validate(&settings)?;
        Ok(settings)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Check every invariant between settings and report all violations together.
pub fn validate(settings: &GenerationSettings) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    let cache = &settings.cache;
    for (label, value) in [
        ("cache.display_min_relevance", cache.display_min_relevance),
        ("cache.display_min_quality", cache.display_min_quality),
        ("cache.storage_min_relevance", cache.storage_min_relevance),
        ("cache.storage_min_quality", cache.storage_min_quality),
        ("cache.legacy_default_relevance", cache.legacy_default_relevance),
    ] {
        if value > 100 {
            errors.push(format!("{label} must be between 0 and 100"));
        }
    }
    if cache.storage_min_relevance > cache.display_min_relevance {
        errors.push(
            "cache.storage_min_relevance must not exceed cache.display_min_relevance".to_string(),
        );
    }
    if cache.storage_min_quality > cache.display_min_quality {
        errors.push(
            "cache.storage_min_quality must not exceed cache.display_min_quality".to_string(),
        );
    }
    if cache.max_clean_input_chars == 0 {
        errors.push("cache.max_clean_input_chars must be greater than zero".to_string());
    }

    let research = &settings.research;
    if research.concurrency == 0 {
        errors.push("research.concurrency must be greater than zero".to_string());
    }
    if research.max_results_per_query == 0 {
        errors.push("research.max_results_per_query must be greater than zero".to_string());
    }
    for (label, cost) in [
        ("research.keyword_cost_basic_usd", research.keyword_cost_basic_usd),
        ("research.keyword_cost_advanced_usd", research.keyword_cost_advanced_usd),
        ("research.semantic_cost_usd", research.semantic_cost_usd),
    ] {
        if !cost.is_finite() || cost < 0.0 {
            errors.push(format!("{label} must be a finite, non-negative number"));
        }
    }

    let retry = &settings.retry;
    if retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }
    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        errors.push("retry.multiplier must be a finite number >= 1.0".to_string());
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        errors.push("retry.initial_delay_ms must not exceed retry.max_delay_ms".to_string());
    }

    let domains = &settings.domains;
    if !(domains.tier_excellent_min >= domains.tier_good_min
        && domains.tier_good_min >= domains.tier_average_min)
    {
        errors.push("domains tier minimums must be ordered excellent >= good >= average".to_string());
    }
    if !(0.0..=1.0).contains(&domains.max_provider_failure_rate) {
        errors.push("domains.max_provider_failure_rate must be in the range 0.0-1.0".to_string());
    }
    if domains.min_quality_samples == 0 || domains.min_relevance_samples == 0 {
        errors.push("domains minimum sample counts must be greater than zero".to_string());
    }
    if domains.min_provider_attempts == 0 {
        errors.push("domains.min_provider_attempts must be greater than zero".to_string());
    }

    let writing = &settings.writing;
    if writing.words_per_paragraph == 0 {
        errors.push("writing.words_per_paragraph must be greater than zero".to_string());
    }
    if writing.min_paragraphs == 0 {
        errors.push("writing.min_paragraphs must be greater than zero".to_string());
    }
    if writing.min_paragraphs > writing.max_paragraphs {
        errors.push("writing.min_paragraphs must not exceed writing.max_paragraphs".to_string());
    }

    let editor = &settings.editor;
    if editor.min_sections == 0 || editor.min_sections > editor.max_sections {
        errors.push("editor section bounds must satisfy 0 < min_sections <= max_sections".to_string());
    }
    if editor.min_queries_per_section == 0
        || editor.min_queries_per_section > editor.max_queries_per_section
    {
        errors.push(
            "editor query bounds must satisfy 0 < min_queries_per_section <= max_queries_per_section"
                .to_string(),
        );
    }

    if settings.fixer.max_iterations > settings.fixer.max_critical_iterations {
        errors.push("fixer.max_iterations must not exceed fixer.max_critical_iterations".to_string());
    }
    if settings.timeout_secs == 0 {
        errors.push("timeout_secs must be greater than zero".to_string());
    }
    if settings.max_sources == 0 {
        errors.push("max_sources must be greater than zero".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        validate(&GenerationSettings::default()).unwrap();
    }

    #[test]
    fn storage_threshold_above_display_is_rejected() {
        let mut settings = GenerationSettings::default();
        settings.cache.storage_min_relevance = 70;
        settings.cache.display_min_relevance = 50;
        let err = validate(&settings).unwrap_err();
        assert!(err.to_string().contains("storage_min_relevance"));

        let mut settings = GenerationSettings::default();
        settings.cache.storage_min_quality = 41;
        settings.cache.display_min_quality = 40;
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn equal_storage_and_display_thresholds_are_allowed() {
        let mut settings = GenerationSettings::default();
        settings.cache.storage_min_quality = settings.cache.display_min_quality;
        settings.cache.storage_min_relevance = settings.cache.display_min_relevance;
        validate(&settings).unwrap();
    }

    #[test]
    fn all_violations_are_reported_together() {
        let mut settings = GenerationSettings::default();
        settings.research.concurrency = 0;
        settings.retry.max_attempts = 0;
        settings.writing.min_paragraphs = 9;
        match validate(&settings) {
            Err(ConfigError::Invalid(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn missing_credentials_are_aggregated() {
        let err = Secrets::from_lookup(|_| None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required credentials: ANTHROPIC_API_KEY, TAVILY_API_KEY"
        );
    }

    #[test]
    fn optional_credentials_may_be_absent() {
        let vars: HashMap<&str, &str> =
            [("ANTHROPIC_API_KEY", "sk-ant"), ("TAVILY_API_KEY", "tvly"), ("EXA_API_KEY", " ")]
                .into_iter()
                .collect();
        let secrets = Secrets::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert!(secrets.exa_api_key.is_none());
        assert!(secrets.database_url.is_none());
    }

    #[test]
    fn settings_load_from_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "timeout_secs = 120\n[research]\nconcurrency = 5\n[cache]\ndisplay_min_quality = 55"
        )
        .unwrap();

        let settings = GenerationSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.timeout_secs, 120);
        assert_eq!(settings.research.concurrency, 5);
        assert_eq!(settings.cache.display_min_quality, 55);
        assert_eq!(settings.cache.storage_min_quality, 20);
    }

    #[test]
    fn invalid_file_settings_fail_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nstorage_min_quality = 90").unwrap();
        assert!(matches!(
            GenerationSettings::load(Some(file.path())),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[research]\nparallelism = 4").unwrap();
        assert!(matches!(
            GenerationSettings::load(Some(file.path())),
            Err(ConfigError::Parse { .. })
        ));
    }
}
