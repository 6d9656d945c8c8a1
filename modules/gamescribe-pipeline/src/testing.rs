// Test mocks for the generation pipeline.
//
// One mock per trait boundary:
// - ScriptedModel (LanguageModel): per-agent text/object handlers, call log
// - MockSearcher (WebSearcher): query-to-response map, failures, delays
// - ManualClock (Clock): time moves only when told to
// - RecordingProgress (ProgressReporter): captures every callback

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use gamescribe_common::{normalize_query, TokenUsage};
use search_client::{ProviderKind, SearchHit, SearchOptions, SearchResponse};

use crate::traits::{
    Clock, GenerateRequest, LanguageModel, ObjectGeneration, ProgressReporter, TextGeneration,
    WebSearcher,
};
use crate::usage::Stage;

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

type TextHandler = Box<dyn Fn(&GenerateRequest) -> Result<String> + Send + Sync>;
type ObjectHandler = Box<dyn Fn(&GenerateRequest) -> Result<serde_json::Value> + Send + Sync>;
type DelayFn = Box<dyn Fn(&GenerateRequest) -> Option<Duration> + Send + Sync>;

/// Language model that answers from per-agent handlers. Agents without a
/// handler get an error. Builder pattern: `.with_text()`, `.with_object()`,
/// `.with_delay()`, `.with_usage()`.
pub struct ScriptedModel {
    text: HashMap<&'static str, TextHandler>,
    objects: HashMap<&'static str, ObjectHandler>,
    delay: Option<DelayFn>,
    usage: TokenUsage,
    cost_usd: Option<f64>,
    calls: Mutex<Vec<GenerateRequest>>,
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            text: HashMap::new(),
            objects: HashMap::new(),
            delay: None,
            usage: TokenUsage::new(100, 50),
            cost_usd: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_text<F>(mut self, agent: &'static str, handler: F) -> Self
    where
        F: Fn(&GenerateRequest) -> Result<String> + Send + Sync + 'static,
    {
        self.text.insert(agent, Box::new(handler));
        self
    }

    pub fn with_object<F>(mut self, agent: &'static str, handler: F) -> Self
    where
        F: Fn(&GenerateRequest) -> Result<serde_json::Value> + Send + Sync + 'static,
    {
        self.objects.insert(agent, Box::new(handler));
        self
    }

    /// Sleep before answering. Uses tokio time, so paused-clock tests stay instant.
    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&GenerateRequest) -> Option<Duration> + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage, cost_usd: Option<f64>) -> Self {
        self.usage = usage;
        self.cost_usd = cost_usd;
        self
    }

    pub fn calls(&self) -> Vec<GenerateRequest> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_for(&self, agent: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| c.agent == agent)
            .count()
    }

    async fn before_call(&self, request: &GenerateRequest) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        if let Some(delay) = self.delay.as_ref().and_then(|d| d(request)) {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate_text(&self, request: &GenerateRequest) -> Result<TextGeneration> {
        self.before_call(request).await;
        let Some(handler) = self.text.get(request.agent) else {
            bail!("ScriptedModel: no text handler for agent {}", request.agent);
        };
        Ok(TextGeneration {
            text: handler(request)?,
            usage: self.usage,
            cost_usd: self.cost_usd,
        })
    }

    async fn generate_object(
        &self,
        request: &GenerateRequest,
        _schema: serde_json::Value,
    ) -> Result<ObjectGeneration> {
        self.before_call(request).await;
        let Some(handler) = self.objects.get(request.agent) else {
            bail!("ScriptedModel: no object handler for agent {}", request.agent);
        };
        Ok(ObjectGeneration {
            value: handler(request)?,
            usage: self.usage,
            cost_usd: self.cost_usd,
        })
    }
}

// ---------------------------------------------------------------------------
// MockSearcher
// ---------------------------------------------------------------------------

pub fn hit(title: &str, url: &str, content: &str) -> SearchHit {
    SearchHit {
        title: title.to_string(),
        url: url.to_string(),
        content: Some(content.to_string()),
        raw_content: None,
        score: None,
    }
}

pub fn response(hits: Vec<SearchHit>) -> SearchResponse {
    SearchResponse {
        answer: None,
        results: hits,
        cost_usd: None,
    }
}

/// Search provider keyed by normalized query. Unregistered queries fail
/// unless `.with_fallback()` is set, which answers with one generated hit.
pub struct MockSearcher {
    name: String,
    kind: ProviderKind,
    responses: HashMap<String, SearchResponse>,
    failures: HashSet<String>,
    delays: HashMap<String, Duration>,
    fallback: bool,
    calls: Mutex<Vec<String>>,
}

impl MockSearcher {
    pub fn keyword(name: &str) -> Self {
        Self::new(name, ProviderKind::Keyword)
    }

    pub fn semantic(name: &str) -> Self {
        Self::new(name, ProviderKind::Semantic)
    }

    fn new(name: &str, kind: ProviderKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            responses: HashMap::new(),
            failures: HashSet::new(),
            delays: HashMap::new(),
            fallback: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on_query(mut self, query: &str, response: SearchResponse) -> Self {
        self.responses.insert(normalize_query(query), response);
        self
    }

    pub fn failing(mut self, query: &str) -> Self {
        self.failures.insert(normalize_query(query));
        self
    }

    pub fn delayed(mut self, query: &str, delay: Duration) -> Self {
        self.delays.insert(normalize_query(query), delay);
        self
    }

    pub fn with_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    /// Every query received, in call order, as sent.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self, query: &str) -> usize {
        let wanted = normalize_query(query);
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|q| normalize_query(q) == wanted)
            .count()
    }
}

#[async_trait]
impl WebSearcher for MockSearcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn search(&self, query: &str, _options: SearchOptions) -> Result<SearchResponse> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(query.to_string());
        let key = normalize_query(query);

        if let Some(delay) = self.delays.get(&key) {
            tokio::time::sleep(*delay).await;
        }
        if self.failures.contains(&key) {
            bail!("MockSearcher({}): provider error for {query}", self.name);
        }
        if let Some(response) = self.responses.get(&key) {
            return Ok(response.clone());
        }
        if self.fallback {
            let slug: String = key
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
                .collect();
            return Ok(response(vec![hit(
                &format!("About {query}"),
                &format!("https://{}.example.com/{slug}", self.name),
                &format!("Research notes for {query}."),
            )]));
        }
        bail!("MockSearcher({}): no response registered for {query}", self.name)
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Clock that only moves via `advance`, or by a fixed tick on every read.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    tick: chrono::Duration,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap_or_default())
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            tick: chrono::Duration::zero(),
        }
    }

    pub fn with_tick(mut self, tick: chrono::Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        let current = *now;
        *now += self.tick;
        current
    }
}

// ---------------------------------------------------------------------------
// RecordingProgress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Stage {
        stage: Stage,
        percent: u8,
        detail: Option<String>,
    },
    Section {
        done: usize,
        total: usize,
        label: String,
    },
    Research {
        done: usize,
        total: usize,
    },
}

#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn research_events(&self) -> Vec<(usize, usize)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Research { done, total } => Some((done, total)),
                _ => None,
            })
            .collect()
    }

    pub fn section_labels(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Section { label, .. } => Some(label),
                _ => None,
            })
            .collect()
    }

    pub fn stages(&self) -> Vec<(Stage, u8)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Stage { stage, percent, .. } => Some((stage, percent)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

impl ProgressReporter for RecordingProgress {
    fn on_progress(&self, stage: Stage, percent: u8, detail: Option<&str>) {
        self.push(ProgressEvent::Stage {
            stage,
            percent,
            detail: detail.map(str::to_string),
        });
    }

    fn on_section_progress(&self, done: usize, total: usize, label: &str) {
        self.push(ProgressEvent::Section {
            done,
            total,
            label: label.to_string(),
        });
    }

    fn on_research_progress(&self, done: usize, total: usize) {
        self.push(ProgressEvent::Research { done, total });
    }
}
