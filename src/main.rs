//! PriorArt - prior-art search and infringement-risk analysis
//!
//! CLI entry point: runs one analysis against the configured index and
//! prints the pipeline's event stream, either human-readable or as raw
//! SSE frames for piping into a serving layer.

use clap::{Parser, Subcommand};
use priorart_core::{
    error::Result, logging::init_logging, Pipeline, PipelineConfig, PipelineEvent, RunRequest,
};
use tokio_stream::StreamExt;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "priorart")]
#[command(about = "Patent prior-art search and infringement-risk analysis", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level (trace, debug, info, warn, error); overrides config
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze an invention idea against the patent index
    Analyze {
        /// The invention idea text
        idea: String,

        /// Session identifier (random if omitted)
        #[arg(long)]
        session: Option<String>,

        /// IPC code prefixes to filter retrieval (repeatable)
        #[arg(long = "ipc")]
        ipc_filters: Vec<String>,

        /// Print raw SSE frames instead of human-readable output
        #[arg(long)]
        sse: bool,
    },

    /// Validate configuration and connectivity prerequisites
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = PipelineConfig::from_env()?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
        config.logging.format = "plain".to_string();
    }
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Analyze {
            idea,
            session,
            ipc_filters,
            sse,
        } => {
            let session_id = session.unwrap_or_else(|| Uuid::new_v4().to_string());
            run_analysis(config, idea, session_id, ipc_filters, sse).await?;
        }
        Commands::CheckConfig => {
            config.validate()?;
            // Constructing the pipeline exercises every credential check.
            Pipeline::from_config(config)?;
            println!("configuration ok");
        }
    }

    Ok(())
}

async fn run_analysis(
    config: PipelineConfig,
    idea: String,
    session_id: String,
    ipc_filters: Vec<String>,
    sse: bool,
) -> Result<()> {
    let pipeline = Pipeline::from_config(config)?;

    let mut request = RunRequest::new(idea, session_id);
    request.ipc_filters = ipc_filters;

    let mut events = pipeline.run(request);
    let mut failed = false;

    while let Some(event) = events.next().await {
        if sse {
            print!("{}", event.to_sse());
        } else {
            print_human(&event);
        }
        if matches!(event, PipelineEvent::Error { .. }) {
            failed = true;
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_human(event: &PipelineEvent) {
    match event {
        PipelineEvent::Progress { percent, message } => {
            eprintln!("[{:>3}%] {}", percent, message);
        }
        PipelineEvent::StreamToken { text } => {
            print!("{}", text);
        }
        PipelineEvent::Complete { result } => {
            println!();
            println!("---");
            println!(
                "risk: {} ({}/100), similar patents: {}",
                result.risk_level, result.risk_score, result.similar_count
            );
            for patent in &result.top_patents {
                println!("  {} ({}%) {}", patent.id, patent.similarity, patent.title);
            }
        }
        PipelineEvent::Empty {} => {
            println!("no similar prior art found");
        }
        PipelineEvent::Error { code, message } => {
            eprintln!("error [{}]: {}", code, message);
        }
    }
}
