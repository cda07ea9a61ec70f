//! # lectern
//!
//! Run pipeline tasks from the command line.
//!
//! ```text
//! lectern tasks
//! lectern schema eli5
//! lectern run hint --context '{"question": "Why do ships float?"}'
//! lectern run eli5 --context @ctx.json --provider scripted \
//!     --provider-config '{"responses": [{"error": "timeout"}, {"json": {...}}]}' --metrics
//! ```

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use lectern_core::TemplateRegistry;
use lectern_runtime::{Context, Orchestrator, ProviderRegistry, RunOptions, RuntimeConfig};

#[derive(Parser)]
#[command(name = "lectern")]
#[command(about = "Run LLM tasks with caching, retries and validation")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG wins when set.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// YAML runtime configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task and print the result as JSON
    Run {
        /// Task type (see `lectern tasks`)
        task: String,

        /// Context as a JSON object, or @path to read it from a file
        #[arg(short, long)]
        context: String,

        /// Provider type (defaults to the configured default provider)
        #[arg(short, long)]
        provider: Option<String>,

        /// Provider configuration as a JSON object
        #[arg(long)]
        provider_config: Option<String>,

        /// Bypass the result cache
        #[arg(long)]
        no_cache: bool,

        /// Return the parsed response without schema validation
        #[arg(long)]
        no_validate: bool,

        /// Maximum attempts for this run
        #[arg(long)]
        retries: Option<u32>,

        /// Run the same task this many times (exercises the cache)
        #[arg(long, default_value_t = 1)]
        repeat: u32,

        /// Print the metrics report to stderr afterwards
        #[arg(long)]
        metrics: bool,
    },

    /// List task types
    Tasks,

    /// Print the response schema of a task type
    Schema {
        /// Task type
        task: String,
    },

    /// Print the effective configuration as YAML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    tracing::debug!(default_provider = %config.default_provider, "Configuration loaded");

    match cli.command {
        Commands::Run {
            task,
            context,
            provider,
            provider_config,
            no_cache,
            no_validate,
            retries,
            repeat,
            metrics,
        } => {
            let provider_type = provider.unwrap_or_else(|| config.default_provider.clone());
            let provider_config = match provider_config {
                Some(raw) => serde_json::from_str(&raw).context("parsing --provider-config")?,
                None => JsonValue::Object(Default::default()),
            };
            let context = load_context(&context)?;

            let mut options = RunOptions::default();
            if no_cache {
                options = options.without_cache();
            }
            if no_validate {
                options = options.without_validation();
            }
            if let Some(retries) = retries {
                options = options.with_retries(retries);
            }

            let provider = ProviderRegistry::with_defaults()
                .create(&provider_type, &provider_config)
                .with_context(|| format!("creating provider '{provider_type}'"))?;
            let orchestrator = Orchestrator::builder()
                .config(config.with_default_provider(provider.name()))
                .provider(provider)
                .build()?;

            let mut failed = None;
            for _ in 0..repeat.max(1) {
                match orchestrator.run(&task, &context, &options).await {
                    Ok(output) => println!("{}", serde_json::to_string_pretty(&output)?),
                    Err(e) => {
                        failed = Some(e);
                        break;
                    }
                }
            }

            if metrics {
                eprint!("{}", orchestrator.metrics_report());
                let stats = orchestrator.cache_stats().await;
                eprintln!(
                    "Cache: {} entries, {} hits, {} misses",
                    stats.entries, stats.hits, stats.misses
                );
            }

            if let Some(e) = failed {
                return Err(e).with_context(|| format!("task '{task}' failed"));
            }
        }

        Commands::Tasks => {
            let registry = TemplateRegistry::with_defaults();
            for task_type in registry.task_types() {
                let description = registry
                    .resolve(task_type)
                    .map(|t| t.description().to_string())
                    .unwrap_or_default();
                println!("{task_type:<12} {description}");
            }
        }

        Commands::Schema { task } => {
            let schema = TemplateRegistry::with_defaults().schema_json(&task)?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }

        Commands::Config => {
            print!("{}", config.to_yaml()?);
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_context(raw: &str) -> Result<Context> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading context file {path}"))?,
        None => raw.to_string(),
    };

    match serde_json::from_str::<JsonValue>(&text).context("parsing context JSON")? {
        JsonValue::Object(map) => Ok(map),
        other => bail!("context must be a JSON object, got {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "lectern",
            "-vv",
            "run",
            "eli5",
            "--context",
            r#"{"question": "Q", "answer": "A"}"#,
            "--provider",
            "scripted",
            "--no-cache",
            "--retries",
            "2",
            "--repeat",
            "3",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run {
                task,
                provider,
                no_cache,
                no_validate,
                retries,
                repeat,
                ..
            } => {
                assert_eq!(task, "eli5");
                assert_eq!(provider.as_deref(), Some("scripted"));
                assert!(no_cache);
                assert!(!no_validate);
                assert_eq!(retries, Some(2));
                assert_eq!(repeat, 3);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_load_context_inline() {
        let ctx = load_context(r#"{"topic": "fractions"}"#).unwrap();
        assert_eq!(ctx["topic"], "fractions");
    }

    #[test]
    fn test_load_context_rejects_non_object() {
        assert!(load_context("[1, 2]").is_err());
        assert!(load_context("@/nonexistent/context.json").is_err());
    }
}
