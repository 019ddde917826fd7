//! Sunra CLI - Command-line interface for the Sunra job queue

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use futures::StreamExt;
use serde_json::Value;
use sunra_client::{
    abort_pair, AbortSignal, ClientSettings, Credentials, FileInput, JobStatus, QueuePriority,
    StreamOptions, StreamPayload, SubmitOptions, SubscribeMode, SubscribeOptions, SunraClient,
    SunraError,
};
use tabled::{Table, Tabled};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "sunra")]
#[command(about = "Sunra job queue CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API key (defaults to SUNRA_KEY or client.toml)
    #[arg(long, env = "SUNRA_KEY", hide_env_values = true, global = true)]
    key: Option<String>,

    /// Settings file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job and print its queue position
    Submit {
        /// Endpoint id (owner/alias[/path])
        endpoint: String,

        #[command(flatten)]
        input: InputArgs,

        /// Webhook notified on completion
        #[arg(long)]
        webhook: Option<String>,

        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
    },

    /// Show the current status of a job
    Status {
        request_id: String,

        /// Include log lines
        #[arg(long)]
        logs: bool,
    },

    /// Fetch the result of a completed job
    Result { request_id: String },

    /// Cancel a job
    Cancel { request_id: String },

    /// Submit a job and wait for its result
    Subscribe {
        endpoint: String,

        #[command(flatten)]
        input: InputArgs,

        #[arg(long, value_enum, default_value_t = ModeArg::Polling)]
        mode: ModeArg,

        /// Give up (and cancel the job) after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Milliseconds between status polls
        #[arg(long, default_value = "1000")]
        poll_interval_ms: u64,

        /// Print log lines as they arrive
        #[arg(long)]
        logs: bool,
    },

    /// Run a streaming endpoint and print each payload
    Stream {
        endpoint: String,

        #[command(flatten)]
        input: InputArgs,

        /// Seconds without data before giving up
        #[arg(long, default_value = "15")]
        idle_timeout: u64,
    },

    /// Upload a file and print its URL
    Upload {
        path: PathBuf,

        /// Override the content type guessed from the extension
        #[arg(long)]
        content_type: Option<String>,
    },
}

#[derive(clap::Args)]
struct InputArgs {
    /// Input as a JSON string; `file://` and `data:` strings inside are uploaded
    #[arg(short, long, conflicts_with = "input_file")]
    input: Option<String>,

    /// Read the JSON input from a file
    #[arg(long)]
    input_file: Option<PathBuf>,
}

impl InputArgs {
    async fn load(&self) -> Result<Option<Value>> {
        let raw = match (&self.input, &self.input_file) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read input file {}", path.display()))?,
            (None, None) => return Ok(None),
        };
        let value = serde_json::from_str(&raw).context("Invalid JSON input")?;
        Ok(Some(value))
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    Low,
    Normal,
}

impl From<PriorityArg> for QueuePriority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Low => QueuePriority::Low,
            PriorityArg::Normal => QueuePriority::Normal,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Polling,
    Streaming,
}

impl From<ModeArg> for SubscribeMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Polling => SubscribeMode::Polling,
            ModeArg::Streaming => SubscribeMode::Streaming,
        }
    }
}

#[derive(Tabled)]
struct StatusRow {
    request_id: String,
    status: String,
    queue_position: String,
    response_url: String,
}

impl From<&JobStatus> for StatusRow {
    fn from(status: &JobStatus) -> Self {
        let queue_position = match status {
            JobStatus::InQueue(s) => s.queue_position.to_string(),
            _ => "-".to_string(),
        };
        Self {
            request_id: status.request_id().to_string(),
            status: status.as_str().to_string(),
            queue_position,
            response_url: status.response_url().to_string(),
        }
    }
}

fn init_logging() -> Result<()> {
    let log_format = std::env::var("SUNRA_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("sunra=info"))
        .context("Failed to create env filter")?;

    match log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}

fn build_client(cli: &Cli) -> Result<SunraClient> {
    let settings = match &cli.config {
        Some(path) => ClientSettings::load_from(Some(path)),
        None => ClientSettings::load(),
    }
    .context("Failed to load client settings")?;

    let mut config = settings.into_config();
    if let Some(key) = &cli.key {
        config = config.with_credentials(Credentials::from_static(key.clone()));
    }
    SunraClient::new(config).context("Failed to create client")
}

fn print_status(status: &JobStatus) {
    println!("{}", Table::new(vec![StatusRow::from(status)]));
    if let JobStatus::InProgress(s) = status {
        for line in &s.logs {
            println!("  {} {}", "|".dimmed(), line.message);
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_error(err: &SunraError) {
    eprintln!(
        "{} {} ({}): {}",
        "✗".red().bold(),
        err.kind.as_str().red(),
        err.code,
        err.message
    );
    if let Some(request_id) = &err.request_id {
        eprintln!("  {} {}", "Request:".bold(), request_id);
    }
    if let Some(details) = &err.details {
        eprintln!("  {} {}", "Details:".bold(), details);
    }
}

/// Signal fired by Ctrl-C
fn interrupt_signal() -> AbortSignal {
    let (handle, signal) = abort_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.abort(Some("interrupted"));
        }
    });
    signal
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    let client = build_client(&cli)?;

    if let Err(err) = run(&client, cli.command).await {
        if let Some(sunra_err) = err.downcast_ref::<SunraError>() {
            print_error(sunra_err);
        } else {
            error!(error = %err, "Command failed");
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(client: &SunraClient, command: Commands) -> Result<()> {
    match command {
        Commands::Submit {
            endpoint,
            input,
            webhook,
            priority,
        } => {
            let mut options = SubmitOptions::default().with_priority(priority.into());
            if let Some(input) = input.load().await? {
                options = options.with_input(input);
            }
            if let Some(webhook) = webhook {
                options = options.with_webhook_url(webhook);
            }

            let status = client.submit(&endpoint, options).await?;
            println!("{}", "✓ Job submitted".green().bold());
            println!();
            print_status(&JobStatus::InQueue(status));
        }

        Commands::Status { request_id, logs } => {
            let status = client.status(&request_id, logs).await?;
            print_status(&status);
        }

        Commands::Result { request_id } => {
            let result = client.result(&request_id).await?;
            print_json(&result.data)?;
        }

        Commands::Cancel { request_id } => {
            client.cancel(&request_id).await?;
            println!("{}", format!("✓ Cancel requested for {}", request_id).green().bold());
        }

        Commands::Subscribe {
            endpoint,
            input,
            mode,
            timeout,
            poll_interval_ms,
            logs,
        } => {
            let mut options = SubscribeOptions::default()
                .with_mode(mode.into())
                .with_poll_interval(Duration::from_millis(poll_interval_ms))
                .with_logs(logs)
                .with_abort_signal(interrupt_signal())
                .on_enqueue(|id| println!("{} {}", "Enqueued:".cyan().bold(), id))
                .on_queue_update(|status| match status {
                    JobStatus::InQueue(s) => {
                        println!("  {} position {}", "IN_QUEUE".yellow(), s.queue_position)
                    }
                    JobStatus::InProgress(s) => {
                        for line in &s.logs {
                            println!("  {} {}", "|".dimmed(), line.message);
                        }
                    }
                    JobStatus::Completed(_) => println!("  {}", "COMPLETED".green()),
                });
            if let Some(input) = input.load().await? {
                options = options.with_input(input);
            }
            if let Some(secs) = timeout {
                options = options.with_timeout(Duration::from_secs(secs));
            }

            match client.subscribe(&endpoint, options).await? {
                Some(result) => {
                    println!();
                    print_json(&result.data)?;
                }
                None => {
                    info!(endpoint_id = %endpoint, "Subscription interrupted");
                    println!("{}", "Interrupted".yellow());
                }
            }
        }

        Commands::Stream {
            endpoint,
            input,
            idle_timeout,
        } => {
            let mut options = StreamOptions::for_endpoint(endpoint)
                .with_idle_timeout(Duration::from_secs(idle_timeout))
                .with_abort_signal(interrupt_signal());
            if let Some(input) = input.load().await? {
                options = options.with_input(input);
            }

            let mut stream = client.stream(options).await?;
            while let Some(payload) = stream.next().await {
                match payload {
                    StreamPayload::Json(value) => print_json(&value)?,
                    StreamPayload::Bytes(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
                }
            }
            stream.done().await?;
            println!("{}", "✓ Stream finished".green().bold());
        }

        Commands::Upload { path, content_type } => {
            let url = match content_type {
                Some(content_type) => {
                    let bytes = tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let mut file = FileInput::new(bytes).with_content_type(content_type);
                    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                        file = file.with_file_name(name);
                    }
                    client.upload(file).await?
                }
                None => {
                    let absolute = tokio::fs::canonicalize(&path)
                        .await
                        .with_context(|| format!("Failed to resolve {}", path.display()))?;
                    let uploaded = client
                        .transform_input(format!("file://{}", absolute.display()))
                        .await?;
                    uploaded
                        .as_str()
                        .map(str::to_string)
                        .context("Upload did not return a URL")?
                }
            };
            println!("{}", url);
        }
    }

    Ok(())
}
