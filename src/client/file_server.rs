/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! File server backing remote software updates.
//!
//! Serves `uavcan.file.Read` requests from a temporary directory that is
//! cleaned up on drop. Files are staged into the directory right before an
//! update and addressed by their bare file name.

use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::node::LocalNode;
use crate::types::file::{error, FileRead, ReadResponse};
use crate::{Error, Result};

pub struct FileServer {
    root: tempfile::TempDir,
    served: Arc<Mutex<HashMap<String, u64>>>,
}

impl FileServer {
    /// Creates the backing directory and registers the Read handler on the
    /// given node.
    pub fn new(node: &LocalNode) -> io::Result<Self> {
        let root = tempfile::tempdir()?;
        let base = root.path().to_path_buf();
        let served: Arc<Mutex<HashMap<String, u64>>> = Arc::default();

        let progress = Arc::clone(&served);
        node.serve::<FileRead, _, _>(move |meta, request| {
            let base = base.clone();
            let progress = Arc::clone(&progress);
            async move {
                let response = match read_chunk(&base, &request.path, request.offset).await {
                    Ok(data) => {
                        if let Ok(mut progress) = progress.lock() {
                            progress.insert(request.path.clone(), request.offset + data.len() as u64);
                        }
                        ReadResponse::success(data)
                    }
                    Err(code) => {
                        tracing::warn!(
                            source = %meta.source.map(|n| n.to_string()).unwrap_or_default(),
                            path = %request.path,
                            code,
                            "file read failed"
                        );
                        ReadResponse::failure(code)
                    }
                };
                Some(response)
            }
        });

        Ok(Self { root, served })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Highest byte position a device has read from the given file, for
    /// progress reporting during updates.
    pub fn bytes_served(&self, name: &str) -> u64 {
        self.served
            .lock()
            .map(|progress| progress.get(name).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Copies a file into the served directory, returning the path a device
    /// has to request.
    pub fn stage(&self, source: &Path) -> Result<String> {
        let name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::InvalidConfig(format!("not a file: {}", source.display())))?;
        std::fs::copy(source, self.root.path().join(name))?;
        Ok(name.to_string())
    }
}

async fn read_chunk(base: &Path, path: &str, offset: u64) -> std::result::Result<Vec<u8>, u16> {
    // Only bare file names are served; reject traversal outright.
    let name = Path::new(path);
    if name.components().count() != 1 || path.contains("..") {
        return Err(error::ACCESS_DENIED);
    }
    let full: PathBuf = base.join(name);

    let mut file = tokio::fs::File::open(&full).await.map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => error::NOT_FOUND,
        io::ErrorKind::PermissionDenied => error::ACCESS_DENIED,
        _ => error::IO_ERROR,
    })?;
    file.seek(SeekFrom::Start(offset)).await.map_err(|_| error::IO_ERROR)?;

    let mut data = vec![0u8; FileRead::CHUNK_CAPACITY];
    let mut filled = 0;
    while filled < data.len() {
        match file.read(&mut data[filled..]).await {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(_) => return Err(error::IO_ERROR),
        }
    }
    data.truncate(filled);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_chunks_at_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let content: Vec<u8> = (0..600).map(|i| i as u8).collect();
        std::fs::write(dir.path().join("image.bin"), &content).unwrap();

        let chunk = read_chunk(dir.path(), "image.bin", 0).await.unwrap();
        assert_eq!(chunk.len(), 256);
        assert_eq!(chunk, content[..256]);

        let tail = read_chunk(dir.path(), "image.bin", 512).await.unwrap();
        assert_eq!(tail, content[512..]);

        let past_end = read_chunk(dir.path(), "image.bin", 10_000).await.unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn rejects_missing_and_traversing_paths() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_chunk(dir.path(), "nope.bin", 0).await, Err(error::NOT_FOUND));
        assert_eq!(read_chunk(dir.path(), "../etc/passwd", 0).await, Err(error::ACCESS_DENIED));
    }
}
