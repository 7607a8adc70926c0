//! On-disk cache of decompressed model files.
//!
//! Layout: `<root>/models/<source>-<target>/<local file name>`. Each store
//! writes its own uniquely named `.part` file in the target directory and
//! renames it into place, so a file under its final name is always complete
//! even when two stores for it overlap.

use crate::config::{AppConfig, FetchConfig};
use crate::error::{LinguaError, Result};
use crate::fetch::decompress::{decompress_into, Compression};
use crate::fetch::descriptor::ModelFileDescriptor;
use crate::pair::LanguagePair;
use bytes::Bytes;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory of locally stored model files.
#[derive(Debug, Clone)]
pub struct ModelCache {
    models_dir: PathBuf,
}

impl ModelCache {
    /// Cache rooted at `cache_dir`; model files live in its `models/` child.
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            models_dir: cache_dir.as_ref().join(AppConfig::MODELS_DIR_NAME),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn pair_dir(&self, pair: &LanguagePair) -> PathBuf {
        self.models_dir.join(pair.key())
    }

    /// Final location of a descriptor's decompressed file.
    pub fn path_for(&self, descriptor: &ModelFileDescriptor) -> PathBuf {
        self.pair_dir(&descriptor.pair).join(descriptor.local_name())
    }

    /// True if a complete, non-empty file is present.
    pub async fn contains(&self, path: &Path) -> bool {
        match tokio::fs::metadata(path).await {
            Ok(meta) => meta.is_file() && meta.len() > 0,
            Err(_) => false,
        }
    }

    /// Decompress `data` into `path` atomically, returning the bytes written.
    pub async fn store(
        &self,
        path: PathBuf,
        compression: Compression,
        data: Bytes,
        file_label: String,
    ) -> Result<u64> {
        let written =
            tokio::task::spawn_blocking(move || write_atomic(&path, compression, &data, &file_label))
                .await
                .map_err(|e| LinguaError::Other(format!("Decompression task failed: {}", e)))??;
        Ok(written)
    }

    /// Remove every stored file for a pair. Returns false if there were none.
    pub async fn remove_pair(&self, pair: &LanguagePair) -> Result<bool> {
        let dir = self.pair_dir(pair);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Removed cached model files for {}", pair);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LinguaError::io_with_path(e, dir)),
        }
    }
}

fn write_atomic(path: &Path, compression: Compression, data: &[u8], file: &str) -> Result<u64> {
    let parent = path.parent().ok_or_else(|| LinguaError::Io {
        message: "Model file path has no parent directory".to_string(),
        path: Some(path.to_path_buf()),
        source: None,
    })?;
    std::fs::create_dir_all(parent).map_err(|e| LinguaError::Io {
        message: format!("Failed to create directory: {}", e),
        path: Some(parent.to_path_buf()),
        source: Some(e),
    })?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    // Dropping the temp file on any error path deletes it.
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name))
        .suffix(FetchConfig::TEMP_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| LinguaError::io_with_path(e, parent))?;

    let written = decompress_into(compression, data, BufWriter::new(temp.as_file_mut()), file)?;

    temp.persist(path).map_err(|e| LinguaError::Io {
        message: format!("Failed to move model file into place: {}", e.error),
        path: Some(path.to_path_buf()),
        source: Some(e.error),
    })?;
    debug!("Stored {} ({} bytes) at {}", file, written, path.display());
    Ok(written)
}
