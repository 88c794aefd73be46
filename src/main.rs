mod index;
mod node;
mod utils;

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::index::IndexError;
use crate::index::query::AddressQueryService;
use crate::index::sync::UtxoSyncOrchestrator;
use crate::index::sync::snapshot::SnapshotConfig;
use crate::index::sync::store::UtxoStore;
use crate::index::sync::strategies::SyncConfig;
use crate::node::{NodeRpc, NodeRpcClient};

const DATABASE_FILE: &str = "utxos.sqlite";

/// UTXO index kept in sync with a full node
#[derive(Debug, Parser)]
#[clap(version = "0.1.0")]
struct Cli {
	/// JSON-RPC endpoint of the full node.
	#[arg(long, env = "UTXO_INDEX_RPC_URL", default_value = "http://127.0.0.1:34646")]
	rpc_url: String,

	#[arg(long, env = "UTXO_INDEX_RPC_USER", requires = "rpc_password")]
	rpc_user: Option<String>,

	#[arg(long, env = "UTXO_INDEX_RPC_PASSWORD", requires = "rpc_user")]
	rpc_password: Option<String>,

	/// Directory holding the store and its snapshots.
	#[arg(long, short = 'd', env = "UTXO_INDEX_DATA_DIR", value_name = "PATH", default_value = "./database")]
	data_dir: PathBuf,

	/// Take a snapshot every N applied blocks.
	#[arg(long, default_value_t = 200)]
	snapshot_interval: u64,

	#[arg(long, default_value_t = 1000)]
	poll_interval_ms: u64,

	/// Rows per multi-row insert during catch-up.
	#[arg(long, default_value_t = 1000)]
	flush_batch_size: usize,

	/// Transactions of one block fetched concurrently.
	#[arg(long, default_value_t = 8)]
	rpc_concurrency: usize,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Follow the node and keep the store up to date (default).
	Sync,
	/// Print the UTXOs of an address.
	Utxos { address: String },
	/// Print the pending balance change of an address.
	Mempool { address: String },
	/// Broadcast a raw transaction.
	Send { hex: String },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
	#[error(transparent)]
	Index(#[from] IndexError),

	#[error("Failed to render output: {0}")]
	Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let cli = Cli::parse();
	if let Err(e) = run(cli).await {
		error!("{}", e);
		std::process::exit(1);
	}
}

async fn run(cli: Cli) -> Result<(), CliError> {
	let auth = cli.rpc_user.clone().zip(cli.rpc_password.clone());
	let node: Arc<dyn NodeRpc> =
		Arc::new(NodeRpcClient::new(cli.rpc_url.clone(), auth).map_err(IndexError::from)?);
	let store = Arc::new(
		UtxoStore::open(&cli.data_dir.join(DATABASE_FILE))
			.await
			.map_err(IndexError::from)?,
	);

	match cli.command.unwrap_or(Command::Sync) {
		Command::Sync => {
			let config = SyncConfig {
				poll_interval: Duration::from_millis(cli.poll_interval_ms),
				flush_batch_size: cli.flush_batch_size,
				rpc_concurrency: cli.rpc_concurrency,
				..Default::default()
			};
			let snapshot_config = SnapshotConfig {
				interval: cli.snapshot_interval,
			};
			let mut orchestrator =
				UtxoSyncOrchestrator::new(node, store, config, snapshot_config);

			info!("Starting UTXO sync against {}", cli.rpc_url);
			tokio::select! {
				result = orchestrator.run() => result?,
				_ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, stopping sync"),
			}
			info!(
				"Sync stopped in {:?} mode, next height {}",
				orchestrator.mode(),
				orchestrator.cursor()
			);
		}
		Command::Utxos { address } => {
			let service = AddressQueryService::new(node, store);
			print_json(&service.utxos(&address).await?)?;
		}
		Command::Mempool { address } => {
			let service = AddressQueryService::new(node, store);
			print_json(&service.mempool_change(&address).await?)?;
		}
		Command::Send { hex } => {
			let service = AddressQueryService::new(node, store);
			print_json(&service.send_raw_transaction(&hex).await?)?;
		}
	}

	Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}
