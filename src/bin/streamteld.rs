// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Streaming telemetry daemon (streamteld)
//!
//! Runs the engine over an in-memory datastore loaded from JSON files and
//! prints every notification as one JSON line on stdout. Commands read from
//! stdin: `poll <id>`, `delete <id>`, `state`.

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "streamteld")]
#[command(about = "Streaming telemetry engine: subscribe to operational state and receive it as notifications", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Run the engine
    Run {
        /// Engine configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Schema (JSON)
        #[arg(short, long)]
        schema: PathBuf,

        /// Operational data (JSON object of "module:node" trees)
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Subscribe request to create at startup (JSON, may be repeated)
        #[arg(short, long)]
        request: Vec<PathBuf>,

        /// Override the minimum interval (milliseconds)
        #[arg(long)]
        min_interval_ms: Option<u64>,
    },
    /// Print a sample configuration file
    SampleConfig,
}

#[cfg(feature = "cli")]
fn read_json(path: &std::path::Path) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(feature = "cli")]
async fn handle_command(
    line: &str,
    datastore: &streamtel::datastore::MemoryDatastore,
    server: &streamtel::TelemetryServer,
) -> streamtel::Result<()> {
    use streamtel::datastore::Change;
    use streamtel::TelemetryError;

    let mut words = line.split_whitespace();
    let parse_id = |word: Option<&str>| {
        word.and_then(|w| w.parse::<u64>().ok())
            .ok_or_else(|| TelemetryError::ValidationFailed("expected a request id".into()))
    };
    match words.next() {
        Some("poll") => {
            let id = parse_id(words.next())?;
            datastore
                .call_operation(&server.poll_operation(), serde_json::json!({ "id": id }))
                .await?;
        }
        Some("delete") => {
            let id = parse_id(words.next())?;
            datastore
                .apply_changes(
                    &server.config().module,
                    vec![Change::deleted(server.request_path(id))],
                )
                .await?;
        }
        Some("state") => {
            let state = datastore.read_operational(&server.requests_path()).await?;
            println!("{}", state);
        }
        Some(other) => eprintln!("unknown command {:?} (poll <id> | delete <id> | state)", other),
        None => {}
    }
    Ok(())
}

#[cfg(feature = "cli")]
async fn run(
    config: streamtel::EngineConfig,
    schema: PathBuf,
    data: Option<PathBuf>,
    requests: Vec<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    use std::sync::Arc;
    use streamtel::datastore::{Change, MemoryDatastore, MemorySchema};
    use streamtel::TelemetryServer;
    use tokio::io::AsyncBufReadExt;
    use tokio_util::sync::CancellationToken;

    let datastore = Arc::new(MemoryDatastore::new());
    if let Some(data) = data {
        datastore.load_operational(&read_json(&data)?)?;
    }
    let schema = Arc::new(MemorySchema::from_json_file(&schema.to_string_lossy())?);
    let server = Arc::new(TelemetryServer::new(
        datastore.clone(),
        schema,
        config.clone(),
    )?);

    let mut notifications = datastore.watch_notifications();
    let printer = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            println!("{}", notification.event);
        }
    });

    let shutdown = CancellationToken::new();
    let callbacks = server.register()?;
    let serving = tokio::spawn({
        let server = server.clone();
        let shutdown = shutdown.clone();
        async move { server.serve(callbacks, shutdown).await }
    });

    for path in &requests {
        let payload = read_json(path)?;
        let Some(id) = payload.get("id").and_then(serde_json::Value::as_u64) else {
            log::error!("{} has no request id", path.display());
            continue;
        };
        let change = Change::created(server.request_path(id), payload);
        if let Err(e) = datastore.apply_changes(&config.module, vec![change]).await {
            log::error!("subscribe-request {} from {} rejected: {}", id, path.display(), e);
        }
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if let Err(e) = handle_command(line.trim(), &datastore, &server).await {
                        log::error!("{}: {}", line.trim(), e);
                    }
                }
                None => stdin_open = false,
            },
        }
    }

    log::info!("Shutting down");
    shutdown.cancel();
    serving.await??;
    printer.abort();
    Ok(())
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::SampleConfig => {
            print!("{}", streamtel::EngineConfig::sample_toml());
            Ok(())
        }
        Commands::Run {
            config,
            schema,
            data,
            request,
            min_interval_ms,
        } => {
            let mut config = match config {
                Some(path) => streamtel::EngineConfig::from_toml_file(&path.to_string_lossy())?,
                None => streamtel::EngineConfig::default(),
            };
            if let Some(ms) = min_interval_ms {
                config = config.with_min_interval(std::time::Duration::from_millis(ms));
            }

            env_logger::Builder::new()
                .filter_level(config.log_level.into())
                .parse_default_env()
                .init();

            run(config, schema, data, request).await
        }
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features not enabled. Please compile with --features cli");
    std::process::exit(1);
}
