#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// File name used when the configured path is a directory.
pub const DATAFEED_ID_FILE: &str = "datafeed.id";

/// Best-effort on-disk cache of the current feed id.
///
/// The configured path is either the id file itself or a directory holding
/// [`DATAFEED_ID_FILE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedIdStore {
	path: PathBuf,
}

impl FeedIdStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Where the id is read from and written to.
	pub fn file_path(&self) -> PathBuf {
		if self.path.is_dir() {
			self.path.join(DATAFEED_ID_FILE)
		} else {
			self.path.clone()
		}
	}

	/// Cached id, if any. Missing, empty and unreadable files all yield `None`.
	pub fn load(&self) -> Option<String> {
		let file = self.file_path();
		let contents = match std::fs::read_to_string(&file) {
			Ok(s) => s,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				debug!(path = %file.display(), "no cached datafeed id");
				return None;
			}
			Err(e) => {
				warn!(path = %file.display(), error = %e, "unable to read cached datafeed id");
				return None;
			}
		};

		let id = contents.trim();
		if id.is_empty() {
			debug!(path = %file.display(), "cached datafeed id file is empty");
			return None;
		}
		Some(id.to_string())
	}

	/// Write `id`, replacing any previous content.
	pub fn save(&self, id: &str) -> io::Result<()> {
		let file = self.file_path();
		if let Some(parent) = file.parent()
			&& !parent.as_os_str().is_empty()
		{
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(&file, id)?;
		debug!(path = %file.display(), "datafeed id persisted");
		Ok(())
	}

	/// Drop a stale id. A missing file is not an error.
	pub fn clear(&self) -> io::Result<()> {
		match std::fs::remove_file(self.file_path()) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e),
		}
	}
}
