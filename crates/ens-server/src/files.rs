//! On-disk store for uploaded MP3 files
//!
//! Files are stored flat under one directory as `<uuid>.mp3`. The store is
//! not transactional and is not re-indexed on restart.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use ens_session::SlotFile;

const EXTENSION: &str = "mp3";
const MIME: &str = "audio/mpeg";

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub async fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` under a fresh id; `original_name` is kept for display
    pub async fn save(&self, original_name: &str, bytes: &[u8]) -> io::Result<SlotFile> {
        let file_id = format!("{}.{EXTENSION}", Uuid::new_v4());
        fs::write(self.dir.join(&file_id), bytes).await?;
        log::debug!("[Files] stored {file_id} ({} bytes)", bytes.len());
        Ok(SlotFile {
            file_id,
            file_name: original_name.to_string(),
        })
    }

    pub async fn read(&self, file_id: &str) -> io::Result<Vec<u8>> {
        let path = self.path_for(file_id).ok_or(io::ErrorKind::NotFound)?;
        fs::read(path).await
    }

    /// Delete a stored file; a missing file is not an error
    pub async fn remove(&self, file_id: &str) -> io::Result<()> {
        let Some(path) = self.path_for(file_id) else {
            return Ok(());
        };
        match fs::remove_file(path).await {
            Ok(()) => {
                log::debug!("[Files] removed {file_id}");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Map an id to its path; `None` for anything this store could not
    /// have issued
    pub fn path_for(&self, file_id: &str) -> Option<PathBuf> {
        let stem = file_id.strip_suffix(&format!(".{EXTENSION}"))?;
        Uuid::parse_str(stem).ok()?;
        Some(self.dir.join(file_id))
    }
}

/// Upload filter: `.mp3` extension or `audio/mpeg` content type
pub fn is_mp3(file_name: &str, content_type: Option<&str>) -> bool {
    let by_extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(EXTENSION));
    by_extension || content_type.is_some_and(|t| t.eq_ignore_ascii_case(MIME))
}
