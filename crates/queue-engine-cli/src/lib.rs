//! # Queue Engine CLI
//!
//! Command-line front end for the queue engine.
//!
//! This module provides:
//! - `shell`: an interactive (or piped) session running push, pull and
//!   delete against an in-process engine
//! - `config`: prints the resolved engine configuration
//!
//! Logs go to stderr so shell output on stdout stays machine readable.

use clap::{Parser, Subcommand};
use queue_engine::{
    ConfigurationError, DeleteRequest, EngineConfig, Message, PullRequest, PushRequest,
    QueueEngine, QueueError,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue Engine CLI - push, pull and delete with visibility timeouts
#[derive(Parser, Debug)]
#[command(name = "queue-engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Message queue engine with at-least-once delivery")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QUEUE_ENGINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read queue commands from stdin, one per line
    Shell {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the resolved configuration
    Config {
        /// Output format for configuration
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ConfigFormat,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// One JSON document per command
    Json,
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// TOML format
    Toml,
    /// JSON format
    Json,
}

// ============================================================================
// Shell Commands
// ============================================================================

/// One line of shell input
#[derive(Parser, Debug)]
#[command(name = "shell", no_binary_name = true, disable_version_flag = true)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommand,
}

/// Commands understood by the shell
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ShellCommand {
    /// Add a message to a queue
    Push {
        /// Queue URL
        queue: String,

        /// Seconds before the message becomes visible
        #[arg(short, long)]
        delay: Option<u64>,

        /// Message body; remaining words are joined with single spaces
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        body: Vec<String>,
    },

    /// Take messages from a queue
    Pull {
        /// Queue URL
        queue: String,

        /// Maximum number of messages
        #[arg(short, long)]
        max: Option<u32>,

        /// Seconds the messages stay invisible
        #[arg(short = 't', long)]
        visibility_timeout: Option<u64>,
    },

    /// Acknowledge a delivery
    Delete {
        /// Queue URL
        queue: String,

        /// Receipt handle returned by pull
        receipt_handle: String,
    },

    /// Show queue depths and scheduler counters
    Stats,

    /// End the session
    #[command(alias = "exit")]
    Quit,
}

impl ShellLine {
    /// Parse a whitespace-separated command line
    pub fn parse_line(line: &str) -> Result<Self, clap::Error> {
        Self::try_parse_from(line.split_whitespace())
    }
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Engine failed to start: {0}")]
    Engine(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Engine(_) => 2,
            Self::Io(_) => 3,
            Self::InvalidArgument { .. } => 4,
        }
    }
}

// ============================================================================
// Output Types
// ============================================================================

/// A pulled message as printed by the shell
#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: String,
    pub receipt_handle: Option<String>,
    pub checksum: String,
    pub receive_count: u32,
    pub sent_at: String,
    pub body: String,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.to_string(),
            receipt_handle: message.receipt_handle.as_ref().map(ToString::to_string),
            checksum: message.checksum.to_string(),
            receive_count: message.receive_count,
            sent_at: message.sent_at.as_datetime().to_rfc3339(),
            body: String::from_utf8_lossy(&message.body).into_owned(),
        }
    }
}

#[derive(Debug, Serialize)]
struct QueueStatsView {
    queue: String,
    depth: usize,
    in_flight: usize,
}

#[derive(Debug, Serialize)]
struct StatsView {
    queues: Vec<QueueStatsView>,
    scheduled: u64,
    fired: u64,
    cancelled: u64,
    failed: u64,
    pending: u64,
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    run(cli).await
}

/// Execute an already parsed command line
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Shell { format } => execute_shell_command(config, format).await,
        Commands::Config { format } => {
            let mut stdout = std::io::stdout();
            write_config(&config, format, &mut stdout)
        }
    }
}

/// Initialize logging based on CLI arguments.
///
/// `RUST_LOG` wins over `--log-level` when set.
pub fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level).map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::InvalidArgument {
        arg: "log-level".to_string(),
        message: e.to_string(),
    })
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Execute config command
pub fn write_config<W: Write>(
    config: &EngineConfig,
    format: ConfigFormat,
    output: &mut W,
) -> Result<(), CliError> {
    let rendered = match format {
        ConfigFormat::Toml => toml::to_string_pretty(config).map_err(std::io::Error::other)?,
        ConfigFormat::Json => serde_json::to_string_pretty(config).map_err(std::io::Error::from)?,
    };

    writeln!(output, "{}", rendered.trim_end())?;
    Ok(())
}

/// Execute shell command against stdin and stdout
async fn execute_shell_command(config: EngineConfig, format: OutputFormat) -> Result<(), CliError> {
    let engine = QueueEngine::new(config)?;
    info!(format = ?format, "Starting shell");

    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let mut output = std::io::stdout();
    let result = run_shell(&engine, input, &mut output, format).await;

    engine.shutdown();
    result
}

/// Run shell commands from `input` until EOF or `quit`.
///
/// A failing command prints `error: ...` and the session continues; only
/// I/O failures on `input` or `output` end it early.
pub async fn run_shell<R, W>(
    engine: &QueueEngine,
    input: R,
    output: &mut W,
    format: OutputFormat,
) -> Result<(), CliError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parsed = match ShellLine::parse_line(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                // Covers `help` too, which clap reports as an error kind
                writeln!(output, "{}", e.render().to_string().trim_end())?;
                output.flush()?;
                continue;
            }
        };

        if parsed.command == ShellCommand::Quit {
            break;
        }

        debug!(command = ?parsed.command, "Executing shell command");
        if let Err(e) = execute_shell_line(engine, parsed.command, output, format).await {
            match e {
                ShellLineError::Queue(e) => writeln!(output, "error: {e}")?,
                ShellLineError::Io(e) => return Err(e.into()),
            }
        }
        output.flush()?;
    }

    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum ShellLineError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

async fn execute_shell_line<W: Write>(
    engine: &QueueEngine,
    command: ShellCommand,
    output: &mut W,
    format: OutputFormat,
) -> Result<(), ShellLineError> {
    match command {
        ShellCommand::Push { queue, delay, body } => {
            let mut request = PushRequest::new(queue, body.join(" "));
            if let Some(delay) = delay {
                request = request.with_delay_seconds(delay);
            }

            let checksum = engine.push(request).await?;
            match format {
                OutputFormat::Text => writeln!(output, "{checksum}")?,
                OutputFormat::Json => {
                    print_json(output, &serde_json::json!({ "checksum": checksum.as_str() }))?
                }
            }
        }

        ShellCommand::Pull {
            queue,
            max,
            visibility_timeout,
        } => {
            let mut request = PullRequest::new(queue);
            if let Some(max) = max {
                request = request.with_max_messages(max);
            }
            if let Some(seconds) = visibility_timeout {
                request = request.with_visibility_timeout(seconds);
            }

            let messages: Vec<MessageView> =
                engine.pull(request).await?.iter().map(MessageView::from).collect();

            match format {
                OutputFormat::Text if messages.is_empty() => writeln!(output, "no messages")?,
                OutputFormat::Text => {
                    for message in &messages {
                        writeln!(
                            output,
                            "id={} receipt={} checksum={} receive_count={} body={}",
                            message.id,
                            message.receipt_handle.as_deref().unwrap_or("-"),
                            message.checksum,
                            message.receive_count,
                            message.body
                        )?;
                    }
                }
                OutputFormat::Json => print_json(output, &messages)?,
            }
        }

        ShellCommand::Delete {
            queue,
            receipt_handle,
        } => {
            engine
                .delete(DeleteRequest::new(queue, receipt_handle))
                .await?;
            match format {
                OutputFormat::Text => writeln!(output, "deleted")?,
                OutputFormat::Json => print_json(output, &serde_json::json!({ "deleted": true }))?,
            }
        }

        ShellCommand::Stats => {
            let stats = collect_stats(engine).await?;
            match format {
                OutputFormat::Text => {
                    for queue in &stats.queues {
                        writeln!(
                            output,
                            "queue {} depth={} in_flight={}",
                            queue.queue, queue.depth, queue.in_flight
                        )?;
                    }
                    writeln!(
                        output,
                        "scheduler scheduled={} fired={} cancelled={} failed={} pending={}",
                        stats.scheduled, stats.fired, stats.cancelled, stats.failed, stats.pending
                    )?;
                }
                OutputFormat::Json => print_json(output, &stats)?,
            }
        }

        ShellCommand::Quit => {}
    }

    Ok(())
}

async fn collect_stats(engine: &QueueEngine) -> Result<StatsView, QueueError> {
    let mut queues = Vec::new();
    for url in engine.queue_urls() {
        queues.push(QueueStatsView {
            depth: engine.queue_depth(url.as_str()).await?,
            in_flight: engine.in_flight_count(url.as_str())?,
            queue: url.to_string(),
        });
    }

    let scheduler = engine.scheduler_stats();
    Ok(StatsView {
        queues,
        scheduled: scheduler.scheduled,
        fired: scheduler.fired,
        cancelled: scheduler.cancelled,
        failed: scheduler.failed,
        pending: scheduler.pending(),
    })
}

fn print_json<W: Write, T: Serialize>(output: &mut W, value: &T) -> std::io::Result<()> {
    serde_json::to_writer(&mut *output, value)?;
    writeln!(output)
}
