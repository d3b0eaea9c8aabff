//! artifact-relay CLI - Generate engineering artifacts with quality-gated fallback

use anyhow::Result;
use artifact_relay::{
    config::Config,
    orchestrator::{Disposition, OrchestrationResult, Orchestrator, OrchestratorConfig},
    policy::ArtifactKind,
    request::{ContextSegment, GenerationRequest, SegmentOrigin},
    CaptureStore, HealthCache, Validator,
};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "artifact-relay")]
#[command(about = "Route artifact generation across local and remote model backends")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate one artifact
    Generate {
        /// Artifact type (erd, flowchart, code, jira)
        artifact: String,

        /// What to generate
        instruction: String,

        /// Context files, most relevant first
        #[arg(short, long)]
        context: Vec<PathBuf>,

        /// Skip the local tier and go straight to remote backends
        #[arg(long)]
        force_remote: bool,

        /// Emit the full result as JSON instead of a text report
        #[arg(long)]
        json: bool,
    },

    /// Probe every configured backend
    Health,

    /// Print the artifact policy table
    Policies,

    /// Show recent fine-tuning captures for an artifact type
    Captures {
        /// Artifact type (erd, flowchart, code, jira)
        artifact: String,

        /// How many records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Initialize configuration file with defaults
    Init {
        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Generate {
            artifact,
            instruction,
            context,
            force_remote,
            json,
        } => {
            run_generate(artifact, instruction, context, force_remote, json).await?;
        }
        Commands::Health => {
            run_health().await?;
        }
        Commands::Policies => {
            run_policies()?;
        }
        Commands::Captures { artifact, limit } => {
            run_captures(artifact, limit).await?;
        }
        Commands::Config(cmd) => {
            run_config_command(cmd)?;
        }
    }

    Ok(())
}

fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let capture = if config.capture.enabled {
        Some(CaptureStore::new(config.capture.dir.clone()))
    } else {
        None
    };

    let health = Arc::new(HealthCache::new(
        Duration::from_secs(config.orchestrator.health_ttl_secs),
        Duration::from_millis(config.orchestrator.probe_timeout_ms),
    ));

    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            local_timeout: Duration::from_secs(config.orchestrator.local_timeout_secs),
            remote_timeout: Duration::from_secs(config.orchestrator.remote_timeout_secs),
            gate_timeout: Duration::from_secs(config.orchestrator.gate_timeout_secs),
            max_output_tokens: config.orchestrator.max_output_tokens,
        },
        config.policy_table()?,
        config.build_backends(),
        health,
        Validator::new(config.validator.clone()),
        capture,
    )?;

    Ok(orchestrator)
}

async fn run_generate(
    artifact: String,
    instruction: String,
    context_files: Vec<PathBuf>,
    force_remote: bool,
    json: bool,
) -> Result<()> {
    let artifact = ArtifactKind::from_str(&artifact)?;
    let config = Config::load()?;
    let orchestrator = build_orchestrator(&config)?;

    // files arrive most relevant first; assign descending relevance
    let total = context_files.len();
    let mut segments = Vec::with_capacity(total);
    for (idx, path) in context_files.iter().enumerate() {
        let text = tokio::fs::read_to_string(path).await?;
        let relevance = (total - idx) as f32 / total as f32;
        segments.push(
            ContextSegment::new(path.display().to_string(), text, relevance)
                .with_origin(SegmentOrigin::User),
        );
    }

    let mut request = GenerationRequest::new(artifact, instruction).with_context(segments);
    if force_remote {
        request = request.force_remote();
    }

    info!(artifact = %artifact, "starting generation");

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("  {spinner:.cyan} {msg}")?);
    spinner.set_message(format!("generating {artifact}..."));
    spinner.enable_steady_tick(Duration::from_millis(80));

    let result = orchestrator.generate(&request).await;
    spinner.finish_and_clear();

    let result = result?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if !result.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_result(result: &OrchestrationResult) {
    if let Some(output) = &result.output {
        println!("{output}");
        println!();
    }

    let report = result.report();
    match (&result.winner, result.succeeded()) {
        (Some(winner), true) => {
            let tier = result.tier.map(|t| t.to_string()).unwrap_or_default();
            println!(
                "PASS  score {}  via {} ({} tier){}",
                report.score,
                winner,
                tier,
                if result.captured { "  [captured]" } else { "" }
            );
        }
        _ => {
            println!("FAIL  all candidates exhausted (best score {})", report.score);
        }
    }

    if !report.findings.is_empty() {
        println!("\nFindings:");
        for finding in &report.findings {
            println!("  [{:?}] {}", finding.severity, finding.message);
        }
    }

    println!("\nAttempts ({}):", report.attempts_tried);
    for record in &result.trail {
        let outcome = match record.disposition {
            Disposition::Passed { score } => format!("passed (score {score})"),
            Disposition::ValidationFailed { score } => format!("validation failed (score {score})"),
            Disposition::Failed { failure } => format!("{failure}"),
        };
        println!(
            "  {} [{}] {} in {}ms{}",
            record.backend_id,
            record.tier,
            outcome,
            record.elapsed_ms,
            if record.retried { " (retried)" } else { "" }
        );
    }
}

async fn run_health() -> Result<()> {
    let config = Config::load()?;
    let registry = config.build_backends();

    let mut ids: Vec<_> = registry.keys().cloned().collect();
    ids.sort();

    println!("{:<16} {:<8} {:<24} status", "backend", "tier", "model");
    println!("{}", "-".repeat(62));
    for id in ids {
        let backend = &registry[&id];
        let available = backend.health_check().await;
        println!(
            "{:<16} {:<8} {:<24} {}",
            backend.id(),
            backend.tier().to_string(),
            backend.model_name(),
            if available { "available" } else { "UNAVAILABLE" }
        );
    }

    Ok(())
}

fn run_policies() -> Result<()> {
    let config = Config::load()?;
    let table = config.policy_table()?;

    for kind in table.kinds() {
        let policy = table.policy_for(kind)?;
        println!("{kind}:");
        println!(
            "  thresholds: pass {} / capture {}",
            policy.pass_threshold, policy.capture_threshold
        );
        println!(
            "  attempts: {} local / {} remote",
            policy.max_local_attempts, policy.max_remote_attempts
        );
        for candidate in &policy.local {
            println!(
                "  local  {} ({}, {} tokens, {:?})",
                candidate.id, candidate.model, candidate.max_input_tokens, candidate.cost
            );
        }
        for candidate in &policy.remote {
            println!(
                "  remote {} ({}, {} tokens, {:?})",
                candidate.id, candidate.model, candidate.max_input_tokens, candidate.cost
            );
        }
        println!();
    }

    Ok(())
}

async fn run_captures(artifact: String, limit: usize) -> Result<()> {
    let artifact = ArtifactKind::from_str(&artifact)?;
    let config = Config::load()?;
    let store = CaptureStore::new(config.capture.dir.clone());

    let records = store.tail(artifact, limit).await?;
    if records.is_empty() {
        println!("No captures for '{artifact}' in {}", store.dir().display());
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {}  score {}  via {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.artifact,
            record.score,
            record.backend_id
        );
        println!("  prompt: {}", record.prompt_summary);
    }

    Ok(())
}

fn run_config_command(cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Init { force } => {
            let path = Config::default_path();
            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save()?;
            println!("Configuration file created at: {}", path.display());
            println!();
            println!("Next steps:");
            println!("  1. Edit the config file to adjust backends and policies, or");
            println!("  2. Set environment variables:");
            println!("     export ANTHROPIC_API_KEY=your_key");
            println!("     export OPENAI_API_KEY=your_key");
        }
        ConfigCommands::Show => {
            let mut config = Config::load()?;
            if config.remote.openai.api_key.is_some() {
                config.remote.openai.api_key = Some("***".to_string());
            }
            if config.remote.anthropic.api_key.is_some() {
                config.remote.anthropic.api_key = Some("***".to_string());
            }
            println!("{}", toml::to_string_pretty(&config)?);

            println!("--- Environment Variables ---");
            for var in [
                "ARTIFACT_RELAY_LOCAL_URL",
                "ANTHROPIC_API_KEY",
                "OPENAI_API_KEY",
                "ARTIFACT_RELAY_CAPTURE_DIR",
            ] {
                let status = if std::env::var(var).is_ok() { "set" } else { "not set" };
                println!("{var}: {status}");
            }
        }
        ConfigCommands::Path => {
            let path = Config::default_path();
            println!("{}", path.display());
            if path.exists() {
                println!("(file exists)");
            } else {
                println!("(file does not exist - run 'config init' to create)");
            }
        }
        ConfigCommands::Validate => match Config::load()?.validate() {
            Ok(()) => {
                println!("Configuration is valid!");
                let config = Config::load()?;
                let table = config.policy_table()?;
                println!(
                    "{} artifact policies over {} backends",
                    table.len(),
                    config.backends.len()
                );
            }
            Err(e) => {
                println!("Configuration validation failed:");
                println!("  {e}");
            }
        },
    }

    Ok(())
}
