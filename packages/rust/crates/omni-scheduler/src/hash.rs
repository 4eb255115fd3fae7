//! SHA-256 file hashing jobs.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs as tokio_fs;
use tokio::io::AsyncReadExt;

use crate::error::SchedulerError;
use crate::surface::run_all;

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Hashing failure for one file.
#[derive(Error, Debug)]
pub enum HashError {
    /// The file could not be opened or read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// File being hashed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Digest of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    /// Hashed file.
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the file contents.
    pub sha256: String,
}

/// Hash one file's contents.
///
/// # Errors
///
/// Returns [`HashError::Read`] when the file cannot be read.
pub async fn hash_file(path: PathBuf) -> Result<FileDigest, HashError> {
    let read_error = |source: std::io::Error, path: &Path| HashError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio_fs::File::open(&path)
        .await
        .map_err(|source| read_error(source, &path))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; READ_BUFFER_BYTES];
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|source| read_error(source, &path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(FileDigest {
        sha256: hex::encode(hasher.finalize()),
        path,
    })
}

/// Hash many files with at most `limit` open at once; digests in completion order.
///
/// # Errors
///
/// Fails with the aggregated read failures; see [`crate::Scheduler::run_all`].
pub async fn hash_files<I, P>(paths: I, limit: usize) -> Result<Vec<FileDigest>, SchedulerError<HashError>>
where
    I: IntoIterator<Item = P>,
    I::IntoIter: Send + 'static,
    P: Into<PathBuf> + Send + 'static,
{
    run_all(paths.into_iter().map(|path| hash_file(path.into())), limit).await
}
