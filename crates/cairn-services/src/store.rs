//! Content-addressed fragment store.
//!
//! Fragments are stored by content hash in a two-level directory structure:
//!   {workspace}/fragments/{hash[0..2]}/{full_hash}
//!
//! Files are written once through a temp file and rename. A fragment that
//! already exists is re-read and checked against its hash before it is
//! reused; a mismatch is overwritten.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use cairn_core::crypto;
use memmap2::Mmap;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

fn io_err<'a>(
    action: &'static str,
    path: &'a Path,
) -> impl FnOnce(std::io::Error) -> StoreError + 'a {
    move |source| StoreError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

/// Content-addressed fragment store.
#[derive(Debug, Clone)]
pub struct FragmentStore {
    root: PathBuf,
}

impl FragmentStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(io_err("create store root", &root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has(&self, hash: &[u8; 32]) -> bool {
        self.fragment_path(hash).exists()
    }

    /// Retrieve a fragment. Returns None if not present.
    pub fn get(&self, hash: &[u8; 32]) -> Result<Option<Bytes>, StoreError> {
        let path = self.fragment_path(hash);
        if !path.exists() {
            return Ok(None);
        }

        let file = fs::File::open(&path).map_err(io_err("open fragment", &path))?;

        // Safety: file is opened read-only and fragments are never rewritten
        // in place (writes go through a temp file and rename).
        let mmap = unsafe { Mmap::map(&file).map_err(io_err("mmap fragment", &path))? };

        Ok(Some(Bytes::copy_from_slice(&mmap)))
    }

    /// Store a fragment.
    ///
    /// Writes are atomic: write to temp file, then rename. An existing
    /// fragment whose content still hashes to `hash` is left untouched.
    pub fn put(&self, hash: &[u8; 32], data: &[u8]) -> Result<(), StoreError> {
        let path = self.fragment_path(hash);
        if let Some(existing) = self.get(hash)? {
            if crypto::hash(&existing) == *hash {
                return Ok(());
            }
            tracing::warn!(hash = hex::encode(hash), "stored fragment is corrupt, rewriting");
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err("create fragment dir", parent))?;
        }

        let tmp_path = path.with_extension("tmp");
        {
            let mut file =
                fs::File::create(&tmp_path).map_err(io_err("create temp file", &tmp_path))?;
            file.write_all(data)
                .map_err(io_err("write fragment", &tmp_path))?;
            file.sync_all().map_err(io_err("sync fragment", &tmp_path))?;
        }

        fs::rename(&tmp_path, &path).map_err(io_err("rename fragment into", &path))?;

        tracing::trace!(hash = hex::encode(hash), bytes = data.len(), "fragment stored");
        Ok(())
    }

    fn fragment_path(&self, hash: &[u8; 32]) -> PathBuf {
        let hex = hex::encode(hash);
        self.root.join(&hex[0..2]).join(&hex)
    }

    /// Count stored fragments.
    pub fn count(&self) -> usize {
        let mut total = 0;
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                if let Ok(subdir) = fs::read_dir(entry.path()) {
                    total += subdir.count();
                }
            }
        }
        total
    }
}
