use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use gamescribe_common::{ArticleCategory, GenerationError, GenerationSettings};
use gamescribe_pipeline::testing::{ManualClock, MockSearcher, RecordingProgress, ScriptedModel};
use gamescribe_pipeline::traits::GenerateRequest;
use gamescribe_pipeline::{GenerationContext, Pipeline, PipelineDeps, RetryPolicy, Stage};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn settings() -> GenerationSettings {
    let mut settings = GenerationSettings::default();
    settings.research.batch_delay_ms = 0;
    settings.max_sources = 6;
    settings
}

fn guide() -> GenerationContext {
    GenerationContext::builder()
        .game_name("Elden Ring")
        .category(ArticleCategory::Guide)
        .target_word_count(1_800)
        .build()
}

/// Four sections sharing "early bosses" and reusing one Scout query.
fn plan_json() -> Value {
    json!({
        "title": "Elden Ring: The First Four Bosses",
        "excerpt": "Who to fight first and how to win.",
        "tags": ["elden ring", "guide"],
        "sections": [
            {
                "headline": "Margit",
                "goal": "Beat Margit at Stormveil's gate",
                "research_queries": ["elden ring margit", "elden ring early bosses"],
                "must_cover": ["Spirit Ash"]
            },
            {
                "headline": "Godrick",
                "goal": "Beat Godrick the Grafted",
                "research_queries": ["elden ring godrick", "Elden Ring Early Bosses"]
            },
            {
                "headline": "Rennala",
                "goal": "Beat Rennala at the academy",
                "research_queries": ["elden ring early bosses", "Elden Ring walkthrough"]
            },
            {
                "headline": "Radahn",
                "goal": "Beat Starscourge Radahn",
                "research_queries": ["elden ring radahn", "elden ring  EARLY bosses"]
            }
        ]
    })
}

fn headline_of(request: &GenerateRequest) -> String {
    request
        .prompt
        .lines()
        .find_map(|line| line.strip_prefix("Headline: "))
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn approved() -> Value {
    json!({ "approved": true, "score": 88, "issues": [] })
}

fn rejected(severity: &str, strategy: &str, location: &str) -> Value {
    json!({
        "approved": false,
        "score": 55,
        "issues": [{
            "severity": severity,
            "category": "coverage",
            "location": location,
            "message": "Missing the second phase",
            "fix_strategy": strategy
        }]
    })
}

/// Model that answers every agent; the reviewer's verdict is supplied.
fn model_with_review<F>(review: F) -> ScriptedModel
where
    F: Fn(&GenerateRequest) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    ScriptedModel::new()
        .with_text("scout", |_| Ok("Elden Ring is an open-world action RPG.".into()))
        .with_object("editor", |_| Ok(plan_json()))
        .with_text("specialist", |req| {
            let headline = headline_of(req);
            if req.prompt.contains("Reviewer feedback to address") {
                Ok(format!("Rewritten {headline} section."))
            } else {
                Ok(format!("How to beat {headline}."))
            }
        })
        .with_text("fixer", |req| {
            let headline = req
                .prompt
                .lines()
                .find_map(|l| l.strip_prefix("## Section: "))
                .unwrap_or_default()
                .to_string();
            Ok(format!("Edited {headline} section."))
        })
        .with_object("reviewer", review)
}

struct Harness {
    model: Arc<ScriptedModel>,
    search: Arc<MockSearcher>,
    progress: Arc<RecordingProgress>,
    pipeline: Pipeline,
}

fn harness(model: ScriptedModel) -> Harness {
    harness_with(model, MockSearcher::keyword("tavily").with_fallback(), settings())
}

fn harness_with(model: ScriptedModel, search: MockSearcher, settings: GenerationSettings) -> Harness {
    let model = Arc::new(model);
    let search = Arc::new(search);
    let progress = Arc::new(RecordingProgress::new());
    let deps = PipelineDeps::builder()
        .model(model.clone())
        .keyword_search(search.clone())
        .progress(progress.clone())
        .build();
    let pipeline = match Pipeline::new(deps, settings) {
        Ok(pipeline) => pipeline.with_retry(RetryPolicy::once()),
        Err(err) => panic!("settings rejected: {err}"),
    };
    Harness {
        model,
        search,
        progress,
        pipeline,
    }
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generates_an_article_with_shared_research() {
    let h = harness(model_with_review(|_| Ok(approved())));

    let article = h.pipeline.generate(guide(), &CancellationToken::new()).await.unwrap();

    // A query shared by several sections, or already run by the Scout, is searched once.
    assert_eq!(h.search.call_count("elden ring early bosses"), 1);
    assert_eq!(h.search.call_count("elden ring walkthrough"), 1);
    assert_eq!(h.search.calls().len(), 9);
    assert_eq!(article.research.queries, 9);
    assert!(article.research.failed_queries.is_empty());

    let md = &article.markdown;
    assert_eq!(md.lines().filter(|l| l.starts_with("# ")).count(), 1);
    assert!(md.starts_with("# Elden Ring: The First Four Bosses\n"));
    let headings: Vec<&str> = md.lines().filter(|l| l.starts_with("## ")).collect();
    assert_eq!(
        headings,
        vec!["## Margit", "## Godrick", "## Rennala", "## Radahn", "## Sources"]
    );
    assert!(md.contains("How to beat Rennala."));

    let sources: Vec<&str> = md.lines().filter(|l| l.starts_with("- [")).collect();
    assert_eq!(sources.len(), 6);
    assert_eq!(sources.iter().collect::<HashSet<_>>().len(), 6);

    assert!(article.review.approved);
    assert_eq!(article.fixer_iterations, 0);
    assert_eq!(h.model.calls_for("fixer"), 0);
    assert_eq!(article.plan.sections.len(), 4);
}

#[tokio::test]
async fn metrics_cover_every_stage_in_order() {
    let h = harness(model_with_review(|_| Ok(approved())));

    let article = h.pipeline.generate(guide(), &CancellationToken::new()).await.unwrap();
    let metrics = &article.metrics;

    let stages: Vec<Stage> = metrics.stages.iter().map(|m| m.stage).collect();
    assert_eq!(
        stages,
        vec![Stage::Scout, Stage::Editor, Stage::Specialist, Stage::Reviewer, Stage::Fixer]
    );
    let calls = |stage| metrics.stage(stage).map(|m| m.llm_calls);
    assert_eq!(calls(Stage::Scout), Some(1));
    assert_eq!(calls(Stage::Editor), Some(1));
    assert_eq!(calls(Stage::Specialist), Some(4));
    assert_eq!(calls(Stage::Reviewer), Some(1));
    assert_eq!(calls(Stage::Fixer), Some(0));

    // Default scripted usage is 100 in / 50 out per call.
    assert_eq!(metrics.total_usage().input_tokens, 700);
    assert_eq!(metrics.total_usage().output_tokens, 350);

    // Five Scout searches and four new section searches at the advanced estimate.
    let scout_search = metrics.stage(Stage::Scout).unwrap().search_cost_usd;
    let section_search = metrics.stage(Stage::Specialist).unwrap().search_cost_usd;
    assert!((scout_search - 0.08).abs() < 1e-9, "scout {scout_search}");
    assert!((section_search - 0.064).abs() < 1e-9, "sections {section_search}");
    assert!((article.research.cost_by_provider["tavily"] - 0.144).abs() < 1e-9);
    assert!(metrics.cleaning.is_none());

    let progress = h.progress.stages();
    assert_eq!(progress.len(), 10);
    assert_eq!(progress.first(), Some(&(Stage::Scout, 0)));
    assert_eq!(progress.last(), Some(&(Stage::Fixer, 100)));
}

#[tokio::test]
async fn stage_durations_come_from_the_injected_clock() {
    let model = Arc::new(model_with_review(|_| Ok(approved())));
    let deps = PipelineDeps::builder()
        .model(model)
        .keyword_search(Arc::new(MockSearcher::keyword("tavily").with_fallback()))
        .clock(Arc::new(ManualClock::new().with_tick(chrono::Duration::seconds(1))))
        .build();
    let Ok(pipeline) = Pipeline::new(deps, settings()) else {
        panic!("default settings rejected");
    };

    let article = pipeline
        .with_retry(RetryPolicy::once())
        .generate(guide(), &CancellationToken::new())
        .await
        .unwrap();

    // Stages that never read the clock in between see exactly one tick.
    for stage in [Stage::Editor, Stage::Reviewer, Stage::Fixer] {
        assert_eq!(article.metrics.stage(stage).unwrap().duration_ms, 1_000, "{stage}");
    }
}

#[tokio::test]
async fn list_articles_write_sections_in_parallel() {
    let h = harness(model_with_review(|_| Ok(approved())));
    let ctx = GenerationContext::builder()
        .game_name("Elden Ring")
        .category(ArticleCategory::List)
        .build();

    let article = h.pipeline.generate(ctx, &CancellationToken::new()).await.unwrap();

    let specialist: Vec<GenerateRequest> = h
        .model
        .calls()
        .into_iter()
        .filter(|c| c.agent == "specialist")
        .collect();
    assert_eq!(specialist.len(), 4);
    assert!(specialist.iter().all(|c| !c.prompt.contains("End of the previous section")));
    let headlines: Vec<&str> = article.draft.sections.iter().map(|s| s.headline.as_str()).collect();
    assert_eq!(headlines, vec!["Margit", "Godrick", "Rennala", "Radahn"]);
}

#[tokio::test]
async fn search_failures_degrade_instead_of_failing_the_run() {
    let search = MockSearcher::keyword("tavily")
        .with_fallback()
        .failing("elden ring godrick")
        .failing("Elden Ring latest update patch notes");
    let h = harness_with(model_with_review(|_| Ok(approved())), search, settings());

    let article = h.pipeline.generate(guide(), &CancellationToken::new()).await.unwrap();

    assert_eq!(
        article.research.failed_queries,
        vec!["Elden Ring latest update patch notes", "elden ring godrick"]
    );
    assert_eq!(article.draft.sections.len(), 4);
}

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_context_is_rejected_before_any_call() {
    let h = harness(model_with_review(|_| Ok(approved())));
    let ctx = GenerationContext::builder()
        .game_name("  ")
        .category(ArticleCategory::Review)
        .target_word_count(100)
        .build();

    let err = h.pipeline.generate(ctx, &CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.code(), "CONTEXT_INVALID");
    let GenerationError::ContextInvalid { violations } = &err else {
        panic!("unexpected error {err}");
    };
    assert_eq!(violations.len(), 2);
    assert!(h.model.calls().is_empty());
    assert!(h.search.calls().is_empty());
}

#[tokio::test]
async fn inconsistent_settings_are_a_config_error() {
    let mut bad = GenerationSettings::default();
    bad.cache.storage_min_relevance = 90;
    let deps = PipelineDeps::builder()
        .model(Arc::new(ScriptedModel::new()))
        .keyword_search(Arc::new(MockSearcher::keyword("tavily")))
        .build();

    let Err(err) = Pipeline::new(deps, bad) else {
        panic!("settings accepted");
    };
    assert_eq!(err.code(), "CONFIG_ERROR");
}

#[tokio::test]
async fn editor_gives_up_after_its_retries() {
    let model = model_with_review(|_| Ok(approved())).with_object("editor", |_| {
        Ok(json!({
            "title": "Too short",
            "excerpt": "",
            "sections": [
                { "headline": "One", "goal": "g", "research_queries": ["q1"] },
                { "headline": "Two", "goal": "g", "research_queries": ["q2"] }
            ]
        }))
    });
    let h = harness(model);

    let err = h.pipeline.generate(guide(), &CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.code(), "EDITOR_FAILED");
    assert!(err.to_string().contains("plan must have between 3 and 10 sections, got 2"));
    assert_eq!(h.model.calls_for("editor"), 3);
    assert_eq!(h.model.calls_for("specialist"), 0);

    let editor_prompts: Vec<String> = h
        .model
        .calls()
        .into_iter()
        .filter(|c| c.agent == "editor")
        .map(|c| c.prompt)
        .collect();
    assert!(!editor_prompts[0].contains("previous plan was rejected"));
    assert!(editor_prompts[1].contains("previous plan was rejected"));
    assert!(editor_prompts[1].contains("got 2"));
}

#[tokio::test]
async fn editor_recovers_from_a_malformed_plan() {
    let attempts = AtomicUsize::new(0);
    let model = model_with_review(|_| Ok(approved())).with_object("editor", move |_| {
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(json!({ "title": 42 }))
        } else {
            Ok(plan_json())
        }
    });
    let h = harness(model);

    let article = h.pipeline.generate(guide(), &CancellationToken::new()).await.unwrap();

    assert_eq!(h.model.calls_for("editor"), 2);
    assert_eq!(article.plan.sections.len(), 4);
}

#[tokio::test]
async fn reviewer_failure_is_upstream() {
    let h = harness(model_with_review(|_| bail!("reviewer overloaded")));

    let err = h.pipeline.generate(guide(), &CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.code(), "UPSTREAM_FAILED");
    assert!(err.to_string().starts_with("reviewer failed"));
}

// ---------------------------------------------------------------------------
// Cancellation and timeout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_before_start() {
    let h = harness(model_with_review(|_| Ok(approved())));
    let token = CancellationToken::new();
    token.cancel();

    let err = h.pipeline.generate(guide(), &token).await.unwrap_err();

    assert_eq!(err.code(), "CANCELLED");
    assert!(h.model.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelled_while_writing() {
    let model = model_with_review(|_| Ok(approved()))
        .with_delay(|req| (req.agent == "specialist").then(|| Duration::from_secs(60)));
    let h = harness(model);
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let err = h.pipeline.generate(guide(), &token).await.unwrap_err();

    assert_eq!(err.code(), "CANCELLED");
    assert_eq!(h.model.calls_for("reviewer"), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_run_times_out() {
    let model = model_with_review(|_| Ok(approved()))
        .with_delay(|req| (req.agent == "specialist").then(|| Duration::from_secs(60)));
    let h = harness(model);
    let ctx = GenerationContext::builder()
        .game_name("Elden Ring")
        .category(ArticleCategory::Guide)
        .timeout(Duration::from_secs(30))
        .build();

    let started = tokio::time::Instant::now();
    let err = h.pipeline.generate(ctx, &CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.code(), "TIMEOUT");
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(h.model.calls_for("reviewer"), 0);
}

// ---------------------------------------------------------------------------
// Fix loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fixer_edits_the_located_section_until_approved() {
    let reviews = AtomicUsize::new(0);
    let h = harness(model_with_review(move |_| {
        if reviews.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(rejected("major", "direct_edit", "Godrick"))
        } else {
            Ok(approved())
        }
    }));

    let article = h.pipeline.generate(guide(), &CancellationToken::new()).await.unwrap();

    assert!(article.review.approved);
    assert_eq!(article.fixer_iterations, 1);
    assert_eq!(h.model.calls_for("fixer"), 1);
    assert_eq!(h.model.calls_for("reviewer"), 2);
    assert_eq!(article.draft.sections[1].content, "Edited Godrick section.");
    assert!(article.markdown.contains("Edited Godrick section."));
    assert_eq!(article.draft.sections[0].content, "How to beat Margit.");

    // The re-review bills the fixer stage.
    let fixer = article.metrics.stage(Stage::Fixer).unwrap();
    assert_eq!(fixer.llm_calls, 2);
}

#[tokio::test]
async fn fixer_stops_at_the_normal_cap() {
    let h = harness(model_with_review(|_| Ok(rejected("minor", "expand", "Rennala"))));

    let article = h.pipeline.generate(guide(), &CancellationToken::new()).await.unwrap();

    assert!(!article.review.approved);
    assert_eq!(article.fixer_iterations, 2);
    assert_eq!(h.model.calls_for("fixer"), 2);
    assert_eq!(h.model.calls_for("reviewer"), 3);
}

#[tokio::test]
async fn critical_issues_extend_the_cap() {
    let h = harness(model_with_review(|_| Ok(rejected("critical", "regenerate", "Godrick"))));

    let article = h.pipeline.generate(guide(), &CancellationToken::new()).await.unwrap();

    assert_eq!(article.fixer_iterations, 4);
    assert_eq!(h.model.calls_for("reviewer"), 5);
    assert_eq!(h.model.calls_for("specialist"), 8);
    assert_eq!(article.draft.sections[1].content, "Rewritten Godrick section.");

    let specialist = article.metrics.stage(Stage::Specialist).unwrap();
    let fixer = article.metrics.stage(Stage::Fixer).unwrap();
    assert_eq!(specialist.llm_calls, 4);
    assert_eq!(fixer.llm_calls, 8);
}

#[tokio::test]
async fn unlocatable_issues_end_the_loop() {
    let h = harness(model_with_review(|_| Ok(rejected("major", "direct_edit", "Malenia"))));

    let article = h.pipeline.generate(guide(), &CancellationToken::new()).await.unwrap();

    assert_eq!(article.fixer_iterations, 1);
    assert_eq!(h.model.calls_for("fixer"), 0);
    assert_eq!(h.model.calls_for("reviewer"), 1);
}

#[tokio::test]
async fn missing_topics_are_added_as_new_sections() {
    let reviews = AtomicUsize::new(0);
    let h = harness(model_with_review(move |_| {
        if reviews.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(rejected("major", "add_section", "Malenia"))
        } else {
            Ok(approved())
        }
    }));

    let article = h.pipeline.generate(guide(), &CancellationToken::new()).await.unwrap();

    assert_eq!(article.plan.sections.len(), 5);
    assert_eq!(article.draft.sections[4].headline, "Malenia");
    assert_eq!(article.draft.sections[4].content, "How to beat Malenia.");
    let headings: Vec<&str> = article.markdown.lines().filter(|l| l.starts_with("## ")).collect();
    assert_eq!(
        headings,
        vec!["## Margit", "## Godrick", "## Rennala", "## Radahn", "## Malenia", "## Sources"]
    );
}
