use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use gamescribe_common::config::WritingSettings;
use gamescribe_common::{is_cancellation, ArticleCategory, CategorizedSearchResult, ResearchCategory, SearchResultItem};
use gamescribe_pipeline::testing::{RecordingProgress, ScriptedModel};
use gamescribe_pipeline::traits::GenerateRequest;
use gamescribe_pipeline::writing::{SectionWriter, WriteMode};
use gamescribe_pipeline::{ArticlePlan, GenerationContext, PlanSection, ResearchPool, RetryPolicy, UsageMeter};

fn plan(headlines: &[&str]) -> ArticlePlan {
    ArticlePlan {
        title: "Elden Ring Boss Guide".into(),
        excerpt: "Every major boss, in order.".into(),
        tags: vec!["guide".into()],
        sections: headlines
            .iter()
            .map(|h| PlanSection {
                headline: h.to_string(),
                goal: format!("Explain {h}"),
                research_queries: vec![format!("elden ring {}", h.to_lowercase())],
                must_cover: vec![],
            })
            .collect(),
    }
}

fn ctx(category: ArticleCategory) -> GenerationContext {
    GenerationContext::builder()
        .game_name("Elden Ring")
        .category(category)
        .target_word_count(1_800)
        .build()
}

/// Headline of the section a specialist request is for.
fn headline_of(request: &GenerateRequest) -> String {
    request
        .prompt
        .lines()
        .find_map(|line| line.strip_prefix("Headline: "))
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn echo_model() -> ScriptedModel {
    ScriptedModel::new().with_text("specialist", |req| Ok(format!("Body of {}.", headline_of(req))))
}

fn writer(model: Arc<ScriptedModel>) -> SectionWriter {
    SectionWriter::new(model, "sonnet", WritingSettings::default()).with_retry(RetryPolicy::once())
}

// ---------------------------------------------------------------------------
// Parallel mode
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn parallel_sections_come_back_in_plan_order() {
    let model = Arc::new(echo_model().with_delay(|req| {
        let secs = match headline_of(req).as_str() {
            "Margit" => 3,
            "Godrick" => 2,
            "Rennala" => 0,
            _ => 1,
        };
        Some(Duration::from_secs(secs))
    }));
    let progress = Arc::new(RecordingProgress::new());
    let meter = Arc::new(UsageMeter::new());
    let plan = plan(&["Margit", "Godrick", "Rennala", "Radahn"]);

    let sections = writer(model.clone())
        .with_progress(progress.clone())
        .with_meter(meter.clone())
        .write_all(
            &ctx(ArticleCategory::List),
            &plan,
            &ResearchPool::default(),
            WriteMode::Parallel,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let headlines: Vec<&str> = sections.iter().map(|s| s.headline.as_str()).collect();
    assert_eq!(headlines, vec!["Margit", "Godrick", "Rennala", "Radahn"]);
    assert_eq!(sections[2].content, "Body of Rennala.");

    // Progress follows completion order.
    assert_eq!(
        progress.section_labels(),
        vec!["Rennala", "Radahn", "Godrick", "Margit"]
    );
    assert_eq!(meter.totals().llm_calls, 4);
}

#[tokio::test(start_paused = true)]
async fn parallel_sections_overlap_in_time() {
    let model = Arc::new(echo_model().with_delay(|_| Some(Duration::from_secs(5))));
    let plan = plan(&["Margit", "Godrick", "Rennala"]);

    let started = tokio::time::Instant::now();
    writer(model)
        .write_all(
            &ctx(ArticleCategory::News),
            &plan,
            &ResearchPool::default(),
            WriteMode::Parallel,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn parallel_prompts_carry_no_previous_section() {
    let model = Arc::new(echo_model());
    let plan = plan(&["Margit", "Godrick"]);

    writer(model.clone())
        .write_all(
            &ctx(ArticleCategory::Guide),
            &plan,
            &ResearchPool::default(),
            WriteMode::Parallel,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    for call in model.calls() {
        assert!(!call.prompt.contains("End of the previous section"));
        assert!(!call.prompt.contains("Terms already defined"));
    }
}

// ---------------------------------------------------------------------------
// Sequential mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sequential_prompts_carry_the_previous_tail_and_defined_terms() {
    let model = Arc::new(ScriptedModel::new().with_text("specialist", |req| {
        Ok(match headline_of(req).as_str() {
            "Margit" => "Margit punishes greedy players.\n\n### Phase Two\n\nLearn the **Rune Arc** timing and save a **Spirit Ash** for later.".to_string(),
            other => format!("Body of {other}."),
        })
    }));
    let plan = plan(&["Margit", "Godrick", "Rennala"]);

    let sections = writer(model.clone())
        .write_all(
            &ctx(ArticleCategory::Guide),
            &plan,
            &ResearchPool::default(),
            WriteMode::Sequential,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(sections.len(), 3);

    let calls = model.calls();
    assert_eq!(calls.len(), 3);
    assert!(!calls[0].prompt.contains("End of the previous section"));
    assert!(!calls[0].prompt.contains("Already covered in earlier sections"));

    let second = &calls[1].prompt;
    assert!(second.contains("End of the previous section"));
    assert!(second.contains("save a **Spirit Ash** for later."));
    assert!(second.contains("Terms already defined"));
    assert!(second.contains("- Rune Arc\n"));
    assert!(second.contains("- Spirit Ash\n"));
    assert!(second.contains("- Phase Two\n"));
    assert!(second.contains("- Margit\n"));

    let third = &calls[2].prompt;
    assert!(third.contains("Body of Godrick."));
    assert!(third.contains("- Godrick\n"));
    assert!(third.contains("- Rune Arc\n"));
}

#[tokio::test]
async fn categories_without_cross_references_still_get_the_previous_tail() {
    let model = Arc::new(ScriptedModel::new().with_text("specialist", |req| {
        Ok(format!("The **{}** update is live.", headline_of(req)))
    }));
    let plan = plan(&["Patch Notes", "Balance Changes"]);

    writer(model.clone())
        .write_all(
            &ctx(ArticleCategory::News),
            &plan,
            &ResearchPool::default(),
            WriteMode::Sequential,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let second = &model.calls()[1].prompt;
    assert!(second.contains("The **Patch Notes** update is live."));
    assert!(!second.contains("Terms already defined"));
    assert!(!second.contains("Already covered in earlier sections"));
}

#[tokio::test]
async fn sequential_progress_counts_up_in_plan_order() {
    let progress = Arc::new(RecordingProgress::new());
    let plan = plan(&["Margit", "Godrick", "Rennala"]);

    writer(Arc::new(echo_model()))
        .with_progress(progress.clone())
        .write_all(
            &ctx(ArticleCategory::Review),
            &plan,
            &ResearchPool::default(),
            WriteMode::Sequential,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(progress.section_labels(), vec!["Margit", "Godrick", "Rennala"]);
}

// ---------------------------------------------------------------------------
// Prompt content
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prompts_carry_pacing_outline_and_section_research() {
    let mut builder = ResearchPool::builder();
    builder.add(CategorizedSearchResult::new(
        "elden ring overview",
        ResearchCategory::Overview,
        "tavily",
        vec![SearchResultItem::new("Overview", "https://wiki.example.com/elden-ring", "An action RPG by FromSoftware.")],
    ));
    builder.add(CategorizedSearchResult::new(
        "elden ring godrick",
        ResearchCategory::SectionSpecific,
        "tavily",
        vec![SearchResultItem::new("Godrick", "https://wiki.example.com/godrick", "Godrick the Grafted rules Stormveil.")],
    ));
    builder.add(CategorizedSearchResult::new(
        "elden ring margit",
        ResearchCategory::SectionSpecific,
        "tavily",
        vec![SearchResultItem::new("Margit", "https://wiki.example.com/margit", "Margit waits at the gate.")],
    ));
    let pool = builder.build();
    let model = Arc::new(echo_model());
    let plan = plan(&["Margit", "Godrick", "Rennala", "Radahn"]);

    let sections = writer(model.clone())
        .write_all(
            &ctx(ArticleCategory::List),
            &plan,
            &pool,
            WriteMode::Parallel,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let godrick = model
        .calls()
        .into_iter()
        .find(|c| headline_of(c) == "Godrick")
        .unwrap();
    assert!(godrick.prompt.contains("2. Godrick <- this section"));
    assert!(godrick.prompt.contains("Godrick the Grafted rules Stormveil."));
    assert!(godrick.prompt.contains("An action RPG by FromSoftware."));
    assert!(!godrick.prompt.contains("Margit waits at the gate."));
    // 1800 words over 4 sections at 90 words per paragraph.
    assert!(godrick.prompt.contains("Length: 4 to 6 paragraphs."));

    let urls: Vec<&str> = sections[1].sources.iter().map(|s| s.url.as_str()).collect();
    assert_eq!(urls, vec!["https://wiki.example.com/godrick", "https://wiki.example.com/elden-ring"]);
    assert!(sections[1].thin_research);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_token_writes_nothing() {
    let model = Arc::new(echo_model());
    let token = CancellationToken::new();
    token.cancel();

    for mode in [WriteMode::Sequential, WriteMode::Parallel] {
        let err = writer(model.clone())
            .write_all(
                &ctx(ArticleCategory::Guide),
                &plan(&["Margit", "Godrick"]),
                &ResearchPool::default(),
                mode,
                &token,
            )
            .await
            .unwrap_err();
        assert!(is_cancellation(&err), "{mode:?}: {err:#}");
    }
    assert!(model.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_an_in_flight_section() {
    let model = Arc::new(echo_model().with_delay(|_| Some(Duration::from_secs(60))));
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let err = writer(model)
        .write_all(
            &ctx(ArticleCategory::Guide),
            &plan(&["Margit", "Godrick"]),
            &ResearchPool::default(),
            WriteMode::Sequential,
            &token,
        )
        .await
        .unwrap_err();

    assert!(is_cancellation(&err));
    assert!(started.elapsed() < Duration::from_secs(60));
}
