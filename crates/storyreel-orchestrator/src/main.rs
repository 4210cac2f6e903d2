//! StoryReel command-line entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storyreel_ledger::Ledger;
use storyreel_media::{FfmpegAssembler, F5TtsSynthesizer, WhisperSubtitler};
use storyreel_orchestrator::metrics::init_metrics;
use storyreel_orchestrator::{
    parse_transcription, Collaborators, DriveMode, LocalMaterializer, PhaseScheduler,
    PipelineConfig, PipelineDriver, Prompts, ProviderKind, RunOutcome, RunSummary,
};

#[derive(Debug, Parser)]
#[command(name = "storyreel", version, about = "Generate narrated story videos")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a run, or resume the one recorded in the ledger
    Run(RunArgs),
    /// Print the current ledger summary
    Status,
    /// Continue an existing ledger without creating items
    Resume,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// bulk or legacy
    #[arg(long)]
    mode: Option<DriveMode>,

    /// openai, openai-batch, deepseek, lmstudio or fallback
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// Number of stories to generate
    #[arg(long)]
    count: Option<u32>,

    /// Use this title instead of generating one (repeatable)
    #[arg(long = "title")]
    titles: Vec<String>,

    /// none, srt, srt-burned or ass-burned
    #[arg(long)]
    transcription: Option<String>,

    /// Show the title as the first ASS cue
    #[arg(long)]
    include_title_in_ass: bool,
}

impl RunArgs {
    fn apply(self, config: &mut PipelineConfig) -> anyhow::Result<()> {
        if let Some(mode) = self.mode {
            config.mode = Some(mode);
            config.clear_rejected("PIPELINE_MODE");
        }
        if let Some(provider) = self.provider {
            config.provider = provider;
            config.clear_rejected("TEXT_PROVIDER");
        }
        if let Some(count) = self.count {
            config.story_count = count;
        }
        if !self.titles.is_empty() {
            config.custom_titles = self.titles;
        }
        if let Some(value) = self.transcription {
            config.transcription = parse_transcription(&value).map_err(anyhow::Error::msg)?;
            config.clear_rejected("TRANSCRIPTION");
        }
        if self.include_title_in_ass {
            config.include_title_in_ass = true;
        }
        Ok(())
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("storyreel=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr.parse().context("METRICS_ADDR is not a socket address")?;
        init_metrics(addr)?;
        info!(%addr, "Metrics exporter listening");
    }

    let cli = Cli::parse();
    let mut config = PipelineConfig::from_env();

    match cli.command {
        Command::Status => status(&config).await,
        Command::Run(args) => {
            args.apply(&mut config)?;
            let ledger = Ledger::open(&config.ledger_path)
                .with_context(|| format!("opening ledger {}", config.ledger_path.display()))?;
            run(config, ledger, true).await
        }
        Command::Resume => {
            let Some(ledger) = Ledger::load(&config.ledger_path)
                .with_context(|| format!("loading ledger {}", config.ledger_path.display()))?
            else {
                bail!("no ledger to resume at {}", config.ledger_path.display());
            };
            run(config, ledger, false).await
        }
    }
}

async fn status(config: &PipelineConfig) -> anyhow::Result<()> {
    match Ledger::load(&config.ledger_path)? {
        Some(ledger) => print!("{}", RunSummary::from_document(&ledger.snapshot().await)),
        None => println!("No run in progress ({})", config.ledger_path.display()),
    }
    Ok(())
}

async fn run(config: PipelineConfig, ledger: Ledger, seed: bool) -> anyhow::Result<()> {
    config.validate()?;
    info!(
        mode = %config.drive_mode(),
        provider = %config.provider,
        stories = config.total_stories(),
        ledger = %config.ledger_path.display(),
        "Starting storyreel"
    );

    let ledger = Arc::new(ledger);
    let provider = config.provider_adapter()?;
    let prompts = Prompts::load(&config.title_prompt_path, &config.story_prompt_path).await?;
    let collaborators = Collaborators {
        synthesizer: Arc::new(F5TtsSynthesizer::new()),
        assembler: Arc::new(FfmpegAssembler::default()),
        subtitler: Arc::new(WhisperSubtitler::new(config.whisper_model.clone())),
        materializer: Arc::new(LocalMaterializer::new(&config.output_dir)),
    };
    let scheduler = PhaseScheduler::new(&config, ledger.clone(), provider, collaborators, prompts);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received stop signal, finishing the current step");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut driver = PipelineDriver::new(config, ledger, scheduler, shutdown_rx);
    if seed {
        driver.seed().await?;
    }

    match driver.run().await {
        Ok(outcome) => {
            print!("{}", outcome.summary());
            match outcome {
                RunOutcome::Completed { archive, .. } => {
                    if let Some(path) = archive {
                        println!("Ledger archived to {}", path.display());
                    }
                }
                RunOutcome::Stopped { .. } => println!("Stopped. Run `storyreel resume` to continue."),
                RunOutcome::Stalled { .. } => {
                    warn!("Run stalled with unfinished items");
                    println!("Some items could not make progress. Run `storyreel resume` to retry.");
                }
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, fatal = e.is_fatal(), "Run halted");
            print!("{}", driver.summary().await);
            Err(e.into())
        }
    }
}
