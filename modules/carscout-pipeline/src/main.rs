use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::ChatClient;
use carscout_common::{Config, Stage};
use carscout_pipeline::adapters::AdapterRegistry;
use carscout_pipeline::alias::AliasMatcher;
use carscout_pipeline::blob::FsBlobStore;
use carscout_pipeline::deps::{PipelineDeps, RiskLlm};
use carscout_pipeline::risk::ChatRiskLlm;
use carscout_pipeline::scheduler::Scheduler;
use carscout_pipeline::worker;
use carscout_store::Queue;
use telegram_client::TelegramClient;

#[derive(Parser)]
#[command(name = "carscout", about = "Run the CarScout listing pipeline")]
struct Cli {
    /// Run only these stages (default: all stages plus the scheduler).
    #[arg(long, value_delimiter = ',')]
    stages: Vec<String>,

    /// Skip the scrape scheduler (workers only).
    #[arg(long)]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("carscout=info".parse()?))
        .init();

    info!("CarScout pipeline starting...");

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_redacted();

    let pool = carscout_store::connect(&config.database_url, (config.worker_fanout * 4) as u32).await?;
    carscout_store::migrate(&pool).await?;

    let llm: Option<Arc<dyn RiskLlm>> = if config.llm_enabled() {
        let client = ChatClient::new(
            config.llm_api_key.clone(),
            config.llm_model.clone(),
            std::time::Duration::from_millis(config.llm_timeout_ms),
        )?;
        let client = match &config.llm_base_url {
            Some(url) => client.with_base_url(url.clone()),
            None => client,
        };
        Some(Arc::new(ChatRiskLlm::new(client)))
    } else {
        info!("No LLM configured; risk escalation disabled");
        None
    };

    let messenger = Arc::new(TelegramClient::new(
        config.telegram_bot_token.clone(),
        std::time::Duration::from_secs(10),
    )?);

    let deps = PipelineDeps {
        pool: pool.clone(),
        queue: Queue::new(pool.clone()),
        blobs: Arc::new(FsBlobStore::new(config.blob_dir.clone())),
        llm,
        messenger,
        adapters: Arc::new(AdapterRegistry::new()),
        aliases: Arc::new(tokio::sync::RwLock::new(AliasMatcher::default())),
        config,
    };
    deps.reload_aliases().await?;

    let mut handles = Vec::new();

    if cli.stages.is_empty() {
        handles.extend(worker::spawn_all(&deps));
    } else {
        for name in &cli.stages {
            let Some(stage) = Stage::parse_str(name) else {
                anyhow::bail!("unknown stage: {name}");
            };
            let deps = deps.clone();
            handles.push(tokio::spawn(async move { worker::run_stage(deps, stage).await }));
        }
    }

    if !cli.no_scheduler {
        let scheduler = Scheduler::new(deps.clone());
        handles.push(tokio::spawn(async move { scheduler.run().await }));
    }

    info!(workers = handles.len(), "Pipeline running");
    for handle in handles {
        handle.await??;
    }
    Ok(())
}
