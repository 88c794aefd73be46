//! SQLite store for the live UTXO set.
//!
//! The store keeps one row per unspent output plus the hash of every applied block height. A
//! block's diff and its height record are written in the same transaction, so readers observe
//! either the state before or after a block, never a partial one. The latest height is derived
//! from the recorded block hashes and therefore only reflects fully applied blocks.
//!
//! The connection pool sits behind a `RwLock`: queries take the read side, while snapshot and
//! restore take the write side to close the pool around a file copy.
//!
//! The lock only covers this process. A `utxos` or `mempool` command running in another process
//! while the sync loop restores a snapshot can hit a replaced database file or a removed
//! write-ahead log and fail; rerunning the command after the restore succeeds.

use crate::index::{BlockDiff, Outpoint, Utxo};

use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Sqlite};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Errors raised by the UTXO store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("Database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Cannot apply height {got}, the store expects height {expected}")]
	NonContiguousHeight { expected: u64, got: u64 },

	#[error("Bulk load requires an empty store, found height {0}")]
	NotEmpty(u64),

	#[error("Corrupt row for {outpoint}: {reason}")]
	CorruptRow { outpoint: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

type UtxoRow = (String, i64, i64, String, String);

/// Persistent UTXO set.
pub struct UtxoStore {
	path: PathBuf,
	pool: RwLock<SqlitePool>,
}

impl UtxoStore {
	/// Opens or creates the store at `path`.
	pub async fn open(path: &Path) -> Result<Self> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			tokio::fs::create_dir_all(parent).await?;
		}

		let pool = Self::connect(path).await?;
		info!("Opened UTXO store at {:?}", path);

		Ok(Self {
			path: path.to_path_buf(),
			pool: RwLock::new(pool),
		})
	}

	async fn connect(path: &Path) -> Result<SqlitePool> {
		let options = SqliteConnectOptions::new()
			.filename(path)
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal)
			.synchronous(SqliteSynchronous::Normal)
			.busy_timeout(Duration::from_secs(5));

		let pool = SqlitePoolOptions::new()
			.max_connections(4)
			.connect_with(options)
			.await?;

		sqlx::query(
			r#"
            CREATE TABLE IF NOT EXISTS utxos (
                txid TEXT NOT NULL,
                vout INTEGER NOT NULL,
                height INTEGER NOT NULL,
                address TEXT NOT NULL,
                amount TEXT NOT NULL,
                PRIMARY KEY (txid, vout)
            );
            CREATE INDEX IF NOT EXISTS idx_utxos_address ON utxos(address);

            CREATE TABLE IF NOT EXISTS block_hashes (
                height INTEGER PRIMARY KEY,
                hash TEXT NOT NULL
            );
            "#,
		)
		.execute(&pool)
		.await?;

		Ok(pool)
	}

	/// Path of the live database file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Highest fully applied height, `None` if the store was never populated.
	pub async fn latest_height(&self) -> Result<Option<u64>> {
		let pool = self.pool.read().await;
		let height: Option<i64> = sqlx::query_scalar("SELECT MAX(height) FROM block_hashes")
			.fetch_one(&*pool)
			.await?;
		Ok(height.map(|h| h as u64))
	}

	/// Hash recorded when `height` was applied.
	pub async fn block_hash(&self, height: u64) -> Result<Option<String>> {
		let pool = self.pool.read().await;
		Ok(
			sqlx::query_scalar("SELECT hash FROM block_hashes WHERE height = ?")
				.bind(height as i64)
				.fetch_optional(&*pool)
				.await?,
		)
	}

	/// The live UTXO at `outpoint`, if any.
	pub async fn get_utxo(&self, outpoint: &Outpoint) -> Result<Option<Utxo>> {
		let pool = self.pool.read().await;
		let row: Option<UtxoRow> = sqlx::query_as(
			"SELECT txid, vout, height, address, amount FROM utxos WHERE txid = ? AND vout = ?",
		)
		.bind(&outpoint.txid)
		.bind(outpoint.vout as i64)
		.fetch_optional(&*pool)
		.await?;
		row.map(utxo_from_row).transpose()
	}

	/// All live UTXOs paying `address`, in no particular order.
	pub async fn get_utxos_by_address(&self, address: &str) -> Result<Vec<Utxo>> {
		let pool = self.pool.read().await;
		let rows: Vec<UtxoRow> = sqlx::query_as(
			"SELECT txid, vout, height, address, amount FROM utxos WHERE address = ?",
		)
		.bind(address)
		.fetch_all(&*pool)
		.await?;
		rows.into_iter().map(utxo_from_row).collect()
	}

	/// Apply one block's diff as a single transaction.
	///
	/// Creations are written before deletions. The diff is rejected without any effect unless
	/// its height directly follows the latest applied height.
	pub async fn apply_diff(&self, diff: &BlockDiff) -> Result<()> {
		let pool = self.pool.read().await;
		let mut tx = pool.begin().await?;

		let latest: Option<i64> = sqlx::query_scalar("SELECT MAX(height) FROM block_hashes")
			.fetch_one(&mut *tx)
			.await?;
		let expected = latest.map_or(1, |h| h as u64 + 1);
		if diff.height != expected {
			return Err(StoreError::NonContiguousHeight {
				expected,
				got: diff.height,
			});
		}

		for utxo in &diff.new_utxos {
			sqlx::query(
				"INSERT OR REPLACE INTO utxos (txid, vout, height, address, amount) VALUES (?, ?, ?, ?, ?)",
			)
			.bind(&utxo.outpoint.txid)
			.bind(utxo.outpoint.vout as i64)
			.bind(utxo.height as i64)
			.bind(&utxo.address)
			.bind(utxo.amount.to_string())
			.execute(&mut *tx)
			.await?;
		}

		let mut missing = 0usize;
		for outpoint in &diff.del_utxos {
			let result = sqlx::query("DELETE FROM utxos WHERE txid = ? AND vout = ?")
				.bind(&outpoint.txid)
				.bind(outpoint.vout as i64)
				.execute(&mut *tx)
				.await?;
			if result.rows_affected() == 0 {
				debug!("Spent outpoint {} was not in the store", outpoint);
				missing += 1;
			}
		}

		sqlx::query("INSERT INTO block_hashes (height, hash) VALUES (?, ?)")
			.bind(diff.height as i64)
			.bind(&diff.block_hash)
			.execute(&mut *tx)
			.await?;

		tx.commit().await?;

		if missing > 0 {
			warn!(
				"Block {} spent {} outpoints that were not indexed",
				diff.height, missing
			);
		}
		Ok(())
	}

	/// Load an accumulated UTXO set into an empty store.
	///
	/// Rows are written in multi-row inserts of `batch_size`, all inside one transaction that
	/// also records `height`, so the store either holds the whole set or nothing.
	pub async fn bulk_load(
		&self,
		height: u64,
		block_hash: &str,
		utxos: &[Utxo],
		batch_size: usize,
	) -> Result<()> {
		let pool = self.pool.read().await;
		let mut tx = pool.begin().await?;

		let latest: Option<i64> = sqlx::query_scalar("SELECT MAX(height) FROM block_hashes")
			.fetch_one(&mut *tx)
			.await?;
		if let Some(latest) = latest {
			return Err(StoreError::NotEmpty(latest as u64));
		}

		for (index, chunk) in utxos.chunks(batch_size.max(1)).enumerate() {
			debug!(
				"Writing UTXO rows [{}, {})",
				index * batch_size,
				index * batch_size + chunk.len()
			);
			let mut builder: QueryBuilder<Sqlite> =
				QueryBuilder::new("INSERT OR REPLACE INTO utxos (txid, vout, height, address, amount) ");
			builder.push_values(chunk, |mut row, utxo| {
				row.push_bind(utxo.outpoint.txid.clone())
					.push_bind(utxo.outpoint.vout as i64)
					.push_bind(utxo.height as i64)
					.push_bind(utxo.address.clone())
					.push_bind(utxo.amount.to_string());
			});
			builder.build().execute(&mut *tx).await?;
		}

		sqlx::query("INSERT INTO block_hashes (height, hash) VALUES (?, ?)")
			.bind(height as i64)
			.bind(block_hash)
			.execute(&mut *tx)
			.await?;

		tx.commit().await?;
		info!("Wrote {} UTXOs up to height {}", utxos.len(), height);
		Ok(())
	}

	/// Take exclusive access to the store, waiting for in-flight queries to finish.
	pub async fn exclusive(&self) -> ExclusiveStore<'_> {
		ExclusiveStore {
			path: &self.path,
			pool: self.pool.write().await,
		}
	}
}

/// Write access to the store's connection pool; queries block while it is held.
pub struct ExclusiveStore<'a> {
	path: &'a Path,
	pool: RwLockWriteGuard<'a, SqlitePool>,
}

impl ExclusiveStore<'_> {
	pub fn path(&self) -> &Path {
		self.path
	}

	/// Checkpoint the write-ahead log and close every connection.
	pub async fn close(&mut self) -> Result<()> {
		sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
			.execute(&*self.pool)
			.await?;
		self.pool.close().await;
		Ok(())
	}

	/// Reconnect to the database file.
	pub async fn reopen(&mut self) -> Result<()> {
		*self.pool = UtxoStore::connect(self.path).await?;
		Ok(())
	}
}

fn utxo_from_row((txid, vout, height, address, amount): UtxoRow) -> Result<Utxo> {
	let outpoint = Outpoint::new(txid, vout as u32);
	let amount = amount.parse::<u128>().map_err(|e| StoreError::CorruptRow {
		outpoint: outpoint.to_string(),
		reason: format!("amount {:?}: {}", amount, e),
	})?;
	Ok(Utxo {
		outpoint,
		height: height as u64,
		address,
		amount,
	})
}
