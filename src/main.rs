//! CLI driver.
//!
//! `streamql run` compiles a query and runs the resulting pipeline until
//! ctrl-c; `streamql seed` creates a stream and publishes demo messages to
//! exercise it.

use async_nats::jetstream;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use streamql::processor::SubjectSink;
use streamql::{EngineConfig, JetStreamSourceFactory, QueryBuilder, StreamQlError, sql};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "streamql", version, about = "Streaming SQL over NATS JetStream")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a query and run its pipeline until interrupted.
    Run {
        /// Query text, e.g. `SELECT x FROM streamA WHERE k = '1'`.
        #[arg(long)]
        query: String,

        /// NATS server URL (overrides the config file).
        #[arg(long, env = "NATS_URL")]
        nats_url: Option<String>,

        /// Optional TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Publish results to this subject instead of logging them.
        #[arg(long)]
        output_subject: Option<String>,
    },
    /// Create a stream and publish demo messages into it.
    Seed {
        /// Stream (and subject prefix) to seed.
        #[arg(long)]
        stream: String,

        /// Number of messages to publish.
        #[arg(long, default_value_t = 20)]
        count: usize,

        /// NATS server URL (overrides the config file).
        #[arg(long, env = "NATS_URL")]
        nats_url: Option<String>,

        /// Optional TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(
    path: Option<PathBuf>,
    nats_url: Option<String>,
) -> Result<EngineConfig, StreamQlError> {
    let mut config = match path {
        Some(path) => EngineConfig::from_file(&path)?,
        None => EngineConfig::default(),
    };
    if let Some(url) = nats_url {
        config.nats_url = url;
    }
    Ok(config)
}

async fn connect(config: &EngineConfig) -> Result<jetstream::Context, StreamQlError> {
    let client = async_nats::connect(&config.nats_url)
        .await
        .map_err(|e| StreamQlError::Broker(format!("{}: {e}", config.nats_url)))?;
    Ok(jetstream::new(client))
}

async fn run_query(
    query: String,
    config: EngineConfig,
    output_subject: Option<String>,
) -> Result<(), StreamQlError> {
    let stmt = sql::parse(&query)?;
    let js = connect(&config).await?;

    let factory = Arc::new(JetStreamSourceFactory::new(js.clone(), &config));
    let mut builder = QueryBuilder::new(factory, config.clone());
    if let Some(subject) = output_subject {
        builder = builder.with_terminal(Arc::new(SubjectSink::new(js.clone(), subject)));
    }

    let token = CancellationToken::new();
    let (error_tx, mut error_rx) = mpsc::channel(config.error_buffer);

    // Source-side errors surface here without stopping the pipeline.
    tokio::spawn(async move {
        while let Some(error) = error_rx.recv().await {
            tracing::error!(%error, "pipeline error");
        }
    });

    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
            shutdown.cancel();
        }
    });

    let graph = builder.build(&stmt, &token, &error_tx)?;
    tracing::info!(processors = graph.processor_count(), "pipeline running");

    match graph.run(token).await {
        Err(StreamQlError::Cancelled) => Ok(()),
        other => other,
    }
}

async fn seed_stream(
    stream: String,
    count: usize,
    config: EngineConfig,
) -> Result<(), StreamQlError> {
    let js = connect(&config).await?;
    js.get_or_create_stream(jetstream::stream::Config {
        name: stream.clone(),
        subjects: vec![stream.clone(), format!("{stream}.>")],
        ..Default::default()
    })
    .await
    .map_err(|e| StreamQlError::Broker(e.to_string()))?;

    for i in 0..count {
        let message = format!("This is message {i}");
        let payload = serde_json::json!({
            "CorrelationID": i.to_string(),
            "StringPayload": message.as_str(),
            "BytePayload": message.as_bytes(),
        });
        let bytes = serde_json::to_vec(&payload)
            .map_err(|e| StreamQlError::Broker(e.to_string()))?;
        js.publish(format!("{stream}.messages"), bytes.into())
            .await
            .map_err(|e| StreamQlError::Broker(e.to_string()))?
            .await
            .map_err(|e| StreamQlError::Broker(e.to_string()))?;
    }
    tracing::info!(stream, count, "seeded");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run {
            query,
            nats_url,
            config,
            output_subject,
        } => match load_config(config, nats_url) {
            Ok(config) => run_query(query, config, output_subject).await,
            Err(e) => Err(e),
        },
        Command::Seed {
            stream,
            count,
            nats_url,
            config,
        } => match load_config(config, nats_url) {
            Ok(config) => seed_stream(stream, count, config).await,
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "fatal");
            ExitCode::FAILURE
        }
    }
}
