//! photogen: run photo generation tasks in-process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use photogen_tasks::blob::FsBlobStore;
use photogen_tasks::driver::Driver;
use photogen_tasks::generation::{EchoGenerator, GenerationApi, HttpGenerationClient};
use photogen_tasks::handler::HandlerRegistry;
use photogen_tasks::logging::init_logging;
use photogen_tasks::worker::{GenerationWorker, LocalWorkerInvoker, QueueTrigger};
use photogen_tasks::{
    Dispatcher, ImageRef, InMemoryTaskStore, PipelineConfig, TaskParams, TaskStatus, TaskStore,
};

/// Resumable photo generation pipeline
#[derive(Parser)]
#[command(name = "photogen")]
#[command(about = "Run photo generation tasks through the staged pipeline", long_about = None)]
#[command(version)]
struct Cli {
    /// Pipeline configuration file (TOML)
    #[arg(long, global = true, env = "PHOTOGEN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a task and drive it to completion
    Run {
        /// Input image paths, relative to --input-dir
        images: Vec<String>,

        /// Directory input references resolve against
        #[arg(long, default_value = ".")]
        input_dir: PathBuf,

        /// Directory generated images are written to
        #[arg(long, default_value = "photogen-out")]
        output_dir: PathBuf,

        /// Number of images to generate
        #[arg(long, default_value_t = 1)]
        count: u32,

        /// Generation parameter as KEY=VALUE (VALUE parsed as JSON if possible)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Generation API endpoint, overrides the config file
        #[arg(long, env = "PHOTOGEN_ENDPOINT")]
        endpoint: Option<String>,

        /// Echo inputs back instead of calling a generation API
        #[arg(long, conflicts_with = "endpoint")]
        echo: bool,
    },

    /// Validate a configuration file and print the effective settings
    CheckConfig,
}

fn main() -> Result<()> {
    init_logging("photogen_tasks=info");
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::CheckConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        },
        Commands::Run {
            images,
            input_dir,
            output_dir,
            count,
            params,
            endpoint,
            echo,
        } => {
            let mut task_params = TaskParams::new(images.into_iter().map(ImageRef::from))
                .with_count(count);
            for param in &params {
                let (key, value) = parse_param(param)?;
                task_params = task_params.with_param(key, value);
            }

            let api: Arc<dyn GenerationApi> = if echo {
                Arc::new(EchoGenerator)
            } else {
                let Some(endpoint) = endpoint.or_else(|| config.generation.endpoint.clone()) else {
                    bail!("no generation endpoint configured; pass --endpoint or --echo");
                };
                Arc::new(HttpGenerationClient::new(endpoint, config.generation.timeout())?)
            };

            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run(config, task_params, input_dir, output_dir, api))
        },
    }
}

fn parse_param(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("invalid --param '{raw}', expected KEY=VALUE");
    };
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

async fn run(
    config: PipelineConfig,
    params: TaskParams,
    input_dir: PathBuf,
    output_dir: PathBuf,
    api: Arc<dyn GenerationApi>,
) -> Result<()> {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let blobs = Arc::new(FsBlobStore::new(input_dir, output_dir));
    let (trigger, queue) = QueueTrigger::channel();

    let worker = Arc::new(GenerationWorker::new(
        Arc::clone(&store),
        api,
        Arc::new(trigger),
        &config,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        HandlerRegistry::standard(blobs, &config),
        Arc::new(LocalWorkerInvoker::new(worker)),
        &config,
    ));

    let task = store.create(params).await?;
    println!("task {}", task.id);

    let mut driver = Driver::new(dispatcher, queue, config.budgets.worker());
    let record = driver
        .run(&task.id, |p| {
            println!("[{:>3}%] {:<11} {}", p.percentage, p.status.as_str(), p.message);
        })
        .await?;

    match record.status {
        TaskStatus::Completed => {
            for upload in record.state_data.uploaded() {
                println!("{}", upload.url);
            }
            Ok(())
        },
        status => bail!(
            "task {} ended {status}: {}",
            record.id,
            record.error.unwrap_or_default()
        ),
    }
}
