// SPDX-License-Identifier: CEPL-1.0
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum FsError {
    #[error("failed to open file at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Supplies whole files as opaque byte buffers.
pub trait FileSource {
    fn read(&self, path: &Path) -> Result<Vec<u8>, FsError>;
}

/// Reads straight from the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiskFiles;

impl FileSource for DiskFiles {
    fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        match std::fs::read(path) {
            Ok(bytes) => {
                debug!(target: "forge::fs", "read {} bytes from {}", bytes.len(), path.display());
                Ok(bytes)
            }
            Err(source) => {
                error!(target: "forge::fs", "failed to open file at {}", path.display());
                Err(FsError::Open {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_existing_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
        let bytes = DiskFiles.read(&path).unwrap();
        assert!(bytes.starts_with(b"[package]"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = DiskFiles.read(Path::new("no/such/shader.spv")).unwrap_err();
        assert!(err.to_string().contains("no/such/shader.spv"));
    }
}
