use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use heal_coordination::{ErrorClass, MemoryBuffer};
use heal_coordination::rate_limiter::TokenBucket;
use heal_orchestrator::{
    ProcessSandbox, RepairSession, RunConfig, SubprocessRebanker,
};
use tokio::sync::Mutex as AsyncMutex;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "heal", about = "Self-healing code repair control loop")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one repair chain against a single file.
    Run {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        language: String,
        #[arg(long, value_enum)]
        error_class: CliErrorClass,
        #[arg(long)]
        message: String,
        #[arg(long, default_value = "mid_tier")]
        preset: String,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "rebanker")]
        rebanker_program: String,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliErrorClass {
    Syntax,
    Logic,
    Runtime,
    Performance,
    Security,
}

impl From<CliErrorClass> for ErrorClass {
    fn from(value: CliErrorClass) -> Self {
        match value {
            CliErrorClass::Syntax => ErrorClass::Syntax,
            CliErrorClass::Logic => ErrorClass::Logic,
            CliErrorClass::Runtime => ErrorClass::Runtime,
            CliErrorClass::Performance => ErrorClass::Performance,
            CliErrorClass::Security => ErrorClass::Security,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            file,
            language,
            error_class,
            message,
            preset,
            config,
            rebanker_program,
        } => {
            let run_config = match config {
                Some(path) => RunConfig::from_file(path)?,
                None => RunConfig {
                    preset: preset.parse().map_err(|e: heal_orchestrator::OrchestratorError| anyhow::anyhow!(e.to_string()))?,
                    rebanker_program: rebanker_program.clone(),
                    ..RunConfig::default()
                },
            };

            let original_code = std::fs::read_to_string(&file)?;
            let policy = run_config.policy();

            let sandbox = Arc::new(ProcessSandbox::new(std::time::Duration::from_secs(10)));
            let rebanker = Arc::new(SubprocessRebanker::new(
                run_config.rebanker_program.clone(),
                run_config.rebanker_args.clone(),
            ));
            let rate_limiter = Arc::new(AsyncMutex::new(TokenBucket::new(policy.rate_limit_per_min)));
            let memory = Arc::new(AsyncMutex::new(MemoryBuffer::default()));

            let mut session = RepairSession::new(
                policy,
                sandbox,
                rebanker,
                rate_limiter,
                memory,
                run_config.workspace_root.clone(),
            );

            let result = session
                .attempt_with_backoff(
                    error_class.into(),
                    message,
                    original_code.clone(),
                    original_code,
                    vec![],
                    language,
                    vec![file.to_string_lossy().to_string()],
                    run_config.attempt_options(),
                    None,
                    None,
                )
                .await?;

            println!("{}", serde_json::to_string_pretty(&result.envelope)?);
            println!("action: {:?}", result.action);
            Ok(())
        }
    }
}
