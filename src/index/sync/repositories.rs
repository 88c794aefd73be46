use crate::index::sync::snapshot::SnapshotError;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One of the two rotated snapshot generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
	MostRecent,
	Previous,
}

impl Generation {
	fn suffix(self) -> &'static str {
		match self {
			Generation::MostRecent => "snapshot-recent",
			Generation::Previous => "snapshot-previous",
		}
	}
}

/// Metadata stored next to each snapshot generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
	/// Latest applied height captured by the snapshot.
	pub sync_height: Option<u64>,
	pub timestamp: String,
}

/// Repository for the rotated snapshot generations
#[async_trait::async_trait]
pub trait SnapshotRepository {
	/// Replace the previous generation with the most recent one.
	async fn rotate(&self) -> Result<(), SnapshotError>;
	/// Copy `source` into the most recent generation.
	async fn save(&self, source: &Path, metadata: &SnapshotMetadata) -> Result<(), SnapshotError>;
	async fn load_metadata(
		&self,
		generation: Generation,
	) -> Result<Option<SnapshotMetadata>, SnapshotError>;
	/// Copy the previous generation over the most recent one and over `target`, then delete
	/// the previous generation.
	async fn restore_previous(&self, target: &Path) -> Result<SnapshotMetadata, SnapshotError>;
}

/// File-based implementation of SnapshotRepository
///
/// Generations live next to the live database as `<db>.snapshot-recent` and
/// `<db>.snapshot-previous`, each with a `.meta.json` sidecar.
pub struct FileSnapshotRepository {
	live_path: PathBuf,
}

impl FileSnapshotRepository {
	pub fn new(live_path: PathBuf) -> Self {
		Self { live_path }
	}

	pub fn get_snapshot_filename(&self, generation: Generation) -> PathBuf {
		with_suffix(&self.live_path, generation.suffix())
	}

	fn get_metadata_filename(&self, generation: Generation) -> PathBuf {
		with_suffix(&self.live_path, &format!("{}.meta.json", generation.suffix()))
	}

	fn is_complete(&self, generation: Generation) -> bool {
		self.get_snapshot_filename(generation).exists()
			&& self.get_metadata_filename(generation).exists()
	}
}

#[async_trait::async_trait]
impl SnapshotRepository for FileSnapshotRepository {
	async fn rotate(&self) -> Result<(), SnapshotError> {
		if !self.is_complete(Generation::MostRecent) {
			debug!("No most recent snapshot to rotate");
			return Ok(());
		}

		for (from, to) in [
			(
				self.get_snapshot_filename(Generation::MostRecent),
				self.get_snapshot_filename(Generation::Previous),
			),
			(
				self.get_metadata_filename(Generation::MostRecent),
				self.get_metadata_filename(Generation::Previous),
			),
		] {
			tokio::fs::rename(&from, &to).await?;
		}

		debug!("Rotated most recent snapshot into previous generation");
		Ok(())
	}

	async fn save(&self, source: &Path, metadata: &SnapshotMetadata) -> Result<(), SnapshotError> {
		let filename = self.get_snapshot_filename(Generation::MostRecent);
		copy_atomically(source, &filename).await?;

		tokio::fs::write(
			self.get_metadata_filename(Generation::MostRecent),
			serde_json::to_string_pretty(metadata)?,
		)
		.await?;

		info!(
			"Saved snapshot to {:?} at height {:?}",
			filename, metadata.sync_height
		);
		Ok(())
	}

	async fn load_metadata(
		&self,
		generation: Generation,
	) -> Result<Option<SnapshotMetadata>, SnapshotError> {
		let filename = self.get_metadata_filename(generation);
		if !filename.exists() {
			return Ok(None);
		}

		let content = tokio::fs::read_to_string(&filename).await?;
		Ok(Some(serde_json::from_str(&content)?))
	}

	async fn restore_previous(&self, target: &Path) -> Result<SnapshotMetadata, SnapshotError> {
		if !self.is_complete(Generation::MostRecent) {
			return Err(SnapshotError::Unavailable("most recent"));
		}
		let metadata = self
			.load_metadata(Generation::Previous)
			.await?
			.filter(|_| self.is_complete(Generation::Previous))
			.ok_or(SnapshotError::Unavailable("previous"))?;

		let previous = self.get_snapshot_filename(Generation::Previous);
		copy_atomically(&previous, &self.get_snapshot_filename(Generation::MostRecent)).await?;
		tokio::fs::copy(
			self.get_metadata_filename(Generation::Previous),
			self.get_metadata_filename(Generation::MostRecent),
		)
		.await?;

		// A leftover write-ahead log would be replayed on top of the restored file.
		for sidecar in ["wal", "shm"] {
			let path = with_suffix(target, sidecar);
			if path.exists() {
				tokio::fs::remove_file(&path).await?;
			}
		}
		copy_atomically(&previous, target).await?;

		tokio::fs::remove_file(&previous).await?;
		tokio::fs::remove_file(self.get_metadata_filename(Generation::Previous)).await?;

		info!(
			"Restored {:?} from previous snapshot at height {:?}",
			target, metadata.sync_height
		);
		Ok(metadata)
	}
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
	let mut name = path.as_os_str().to_owned();
	name.push("-");
	name.push(suffix);
	PathBuf::from(name)
}

/// Copy through a temporary file so `to` is never observed half-written.
async fn copy_atomically(from: &Path, to: &Path) -> Result<(), SnapshotError> {
	let tmp = with_suffix(to, "tmp");
	tokio::fs::copy(from, &tmp).await?;
	tokio::fs::rename(&tmp, to).await?;
	Ok(())
}
