use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ai_client::Claude;
use gamescribe_archive::{MemorySourceStore, PgSourceStore, SourceCache, SourceStore};
use gamescribe_common::{ArticleCategory, GenerationSettings, Secrets};
use gamescribe_pipeline::agents::LlmContentCleaner;
use gamescribe_pipeline::{GenerationContext, LanguageModel, Pipeline, PipelineDeps, UsageMeter, WebSearcher};
use search_client::{ExaClient, TavilyClient};

#[derive(Parser)]
#[command(name = "gamescribe", about = "Generate a long-form article about a game")]
struct Cli {
    /// Game to write about
    #[arg(long)]
    game: String,

    /// news, review, guide or list
    #[arg(long, default_value = "guide")]
    category: ArticleCategory,

    /// Target article length in words
    #[arg(long, default_value_t = 1500)]
    words: u32,

    #[arg(long)]
    description: Option<String>,

    #[arg(long, value_delimiter = ',')]
    genres: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    platforms: Vec<String>,

    /// Extra editorial instructions passed to every agent
    #[arg(long)]
    instructions: Option<String>,

    /// Write sections concurrently regardless of category
    #[arg(long, conflicts_with = "sequential")]
    parallel: bool,

    /// Write sections one after another regardless of category
    #[arg(long)]
    sequential: bool,

    /// Overrides `timeout_secs` from the settings file
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Path to settings TOML file
    #[arg(long, env = "GAMESCRIBE_CONFIG")]
    config: Option<PathBuf>,

    /// Write the markdown here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new("gamescribe=info,gamescribe_pipeline=info,gamescribe_archive=info")
    })?;

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn SourceStore>> {
    match database_url {
        Some(url) => {
            let store = PgSourceStore::connect(url)
                .await
                .context("connecting to Postgres")?;
            store.migrate().await.context("running source cache migrations")?;
            info!("Source cache backed by Postgres");
            Ok(Arc::new(store))
        }
        None => {
            info!("DATABASE_URL not set, source cache is in-memory for this run");
            Ok(Arc::new(MemorySourceStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let settings = GenerationSettings::load(cli.config.as_deref())?;
    let secrets = Secrets::from_env()?;
    secrets.log_redacted();

    let model: Arc<dyn LanguageModel> = Arc::new(Claude::new(
        secrets.anthropic_api_key.clone(),
        settings.models.specialist.clone(),
    ));
    let keyword: Arc<dyn WebSearcher> = Arc::new(TavilyClient::new(secrets.tavily_api_key.clone()));
    let semantic: Option<Arc<dyn WebSearcher>> = secrets
        .exa_api_key
        .clone()
        .map(|key| Arc::new(ExaClient::new(key)) as Arc<dyn WebSearcher>);

    let cleaning_meter = Arc::new(UsageMeter::new());
    let source_cache = if settings.cache.enabled {
        let store = open_store(secrets.database_url.as_deref()).await?;
        let cleaner = Arc::new(LlmContentCleaner::new(
            model.clone(),
            settings.models.cleaner.clone(),
            settings.cache.max_clean_input_chars,
            cleaning_meter.clone(),
        ));
        let (cache, _writer) = SourceCache::start(
            store,
            cleaner,
            settings.cache.clone(),
            settings.domains.clone(),
        )
        .await?;
        Some(Arc::new(cache))
    } else {
        None
    };

    let deps = PipelineDeps::builder()
        .model(model)
        .keyword_search(keyword)
        .semantic_search(semantic)
        .source_cache(source_cache.clone())
        .cleaning_meter(Some(cleaning_meter))
        .build();
    let pipeline = Pipeline::new(deps, settings)?;

    let ctx = GenerationContext {
        game_name: cli.game,
        game_description: cli.description,
        genres: cli.genres,
        platforms: cli.platforms,
        category: cli.category,
        target_word_count: cli.words,
        instructions: cli.instructions,
        parallel_sections: match (cli.parallel, cli.sequential) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        },
        timeout: cli.timeout_secs.map(Duration::from_secs),
    };

    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling generation");
            on_signal.cancel();
        }
    });

    let result = pipeline.generate(ctx, &token).await;

    // Let queued cache writes land before exit.
    if let Some(cache) = &source_cache {
        cache.writes().flush().await;
    }

    let article = match result {
        Ok(article) => article,
        Err(err) => bail!("{}: {err}", err.code()),
    };

    info!(
        run_id = %article.run_id,
        approved = article.review.approved,
        score = article.review.score,
        cost_usd = article.metrics.total_cost_usd(),
        duration_ms = article.metrics.total_duration_ms(),
        "Article ready"
    );

    match cli.output {
        Some(path) => std::fs::write(&path, &article.markdown)
            .with_context(|| format!("writing {}", path.display()))?,
        None => print!("{}", article.markdown),
    }
    Ok(())
}
