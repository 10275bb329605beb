// Stablescope CLI — run the API server, dump the live feed, or import chain
// history into the local SQLite warehouse.

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use stablescope::config::{StablescopeConfig, WarehouseBackend};
use stablescope::engine::chain::{ChainReader, ChainReaderConfig, HttpRpcTransport};
use stablescope::engine::server;
use stablescope::engine::warehouse::{import_range, SqliteWarehouse};
use stablescope::AppState;
use stablescope_core::atoms::constants::FEED_MAX_CAPACITY;
use stablescope_core::EngineResult;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "stablescope", author, version, about)]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(short, long, env = "STABLESCOPE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the live feed and the JSON API.
    Serve {
        /// Overrides server.bind_address
        #[arg(long)]
        bind: Option<String>,
        /// Overrides server.port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Initialize the feed once and print the most recent transfers.
    Transfers {
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
    /// Copy Transfer logs for the configured token into the SQLite warehouse.
    Import {
        /// First block (default: one past the highest stored block)
        #[arg(long)]
        from: Option<u64>,
        /// Last block (default: chain head)
        #[arg(long)]
        to: Option<u64>,
        /// Overrides warehouse.sqlite_path
        #[arg(long)]
        db: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match StablescopeConfig::load(cli.config.as_deref()) {
        Ok(config) => run(cli.command, config).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, mut config: StablescopeConfig) -> EngineResult<()> {
    match command {
        Commands::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await
        }
        Commands::Transfers { count } => {
            let state = AppState::from_config(config)?;
            state.feed.refresh().await;
            let transfers = state.feed.latest(count.clamp(1, FEED_MAX_CAPACITY));
            println!("{}", serde_json::to_string_pretty(&transfers)?);
            state.feed.shutdown().await;
            Ok(())
        }
        Commands::Import { from, to, db } => {
            if let Some(db) = db {
                config.warehouse.sqlite_path = db;
                config.warehouse.backend = WarehouseBackend::Sqlite;
            }
            import(config, from, to).await
        }
    }
}

async fn serve(config: StablescopeConfig) -> EngineResult<()> {
    let listener = server::bind(&config.server).await?;
    let state = Arc::new(AppState::from_config(config)?);
    state.feed.spawn();

    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server::serve(listener, state.clone(), shutdown.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C ({}), shutting down", e);
    }
    info!("Shutting down");
    shutdown.cancel();
    state.feed.shutdown().await;
    match server_task.await {
        Ok(result) => result,
        Err(e) => {
            warn!("[http] Server task ended abnormally: {}", e);
            Ok(())
        }
    }
}

async fn import(config: StablescopeConfig, from: Option<u64>, to: Option<u64>) -> EngineResult<()> {
    info!("[warehouse] Importing into SQLite database {}", config.warehouse.sqlite_path);
    let transport = HttpRpcTransport::from_config(&config.chain)?;
    let reader = ChainReader::new(Arc::new(transport), ChainReaderConfig::from(&config.chain));
    let warehouse = SqliteWarehouse::open(&config.warehouse.sqlite_path)?;
    let token = config.token.address_lower();

    let to = match to {
        Some(to) => to,
        None => reader.current_block_number().await?,
    };
    let from = match from {
        Some(from) => from,
        None => match warehouse.latest_block(&token)? {
            Some(last) => last + 1,
            None => to.saturating_sub(config.chain.max_block_range * u64::from(config.feed.backfill_batches)),
        },
    };
    if from > to {
        info!("[warehouse] Already up to date at block {}", to);
        return Ok(());
    }

    let summary = import_range(&reader, &warehouse, &token, from, to).await?;
    info!(
        "[warehouse] Imported blocks {}-{}: {} logs, {} new rows",
        from, to, summary.scanned_logs, summary.inserted
    );
    for (start, end) in &summary.skipped_ranges {
        warn!("[warehouse] Blocks {}-{} were skipped; rerun with --from {} --to {}", start, end, start, end);
    }
    Ok(())
}
