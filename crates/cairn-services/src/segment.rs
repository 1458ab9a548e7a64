//! File segmentation and content addressing.
//!
//! A file is cut into fixed-size segments; the last segment is zero-padded
//! to full size. Each segment is split into `DATA_FRAGMENTS` equal fragments.
//!
//!   fragment_hash = BLAKE3(fragment)
//!   segment_hash  = BLAKE3(padded segment)
//!   content_root  = BLAKE3(segment_hash_0 || segment_hash_1 || ...)
//!
//! The same bytes always produce the same root and segment count.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use cairn_core::crypto::{hash, Hasher};
use serde::{Deserialize, Serialize};

use crate::store::{FragmentStore, StoreError};

/// Data fragments per segment.
pub const DATA_FRAGMENTS: usize = 4;

/// A 32-byte digest, rendered and serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub [u8; 32]);

/// Integrity root over all segments of a file.
pub type ContentRoot = Digest;

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

impl Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("digest must be 32 bytes"))?;
        Ok(Digest(arr))
    }
}

/// Metadata describing one segment of a processed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub index: u32,
    pub segment_hash: Digest,
    pub fragment_hashes: Vec<Digest>,
}

/// Output of [`Segmenter::process`].
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub path: PathBuf,
    pub segments: Vec<SegmentDescriptor>,
    pub root: ContentRoot,
    /// Unpadded length of the source file.
    pub total_bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum FileProcessingError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{0} is empty")]
    EmptyFile(PathBuf),
    #[error("segment size {0} must be a non-zero multiple of {DATA_FRAGMENTS}")]
    InvalidSegmentSize(usize),
    #[error("fragment store: {0}")]
    Store(#[from] StoreError),
}

/// Splits files into segments and fragments, optionally persisting each
/// fragment to a [`FragmentStore`].
#[derive(Debug, Clone)]
pub struct Segmenter {
    segment_size: usize,
    store: Option<FragmentStore>,
}

impl Segmenter {
    pub fn new(segment_size: usize) -> Result<Self, FileProcessingError> {
        if segment_size == 0 || segment_size % DATA_FRAGMENTS != 0 {
            return Err(FileProcessingError::InvalidSegmentSize(segment_size));
        }
        Ok(Self {
            segment_size,
            store: None,
        })
    }

    /// Persist fragments to `store` while processing.
    pub fn with_store(mut self, store: FragmentStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Segment and hash the file at `path`.
    pub fn process(&self, path: &Path) -> Result<ProcessedFile, FileProcessingError> {
        let read_err = |source| FileProcessingError::Read {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).map_err(read_err)?;
        let fragment_size = self.segment_size / DATA_FRAGMENTS;

        let mut segments = Vec::new();
        let mut root = Hasher::new();
        let mut total_bytes = 0u64;
        let mut buf = vec![0u8; self.segment_size];

        loop {
            let filled = read_full(&mut file, &mut buf).map_err(read_err)?;
            if filled == 0 {
                break;
            }
            total_bytes += filled as u64;
            buf[filled..].fill(0);

            let segment_hash = Digest(hash(&buf));
            let mut fragment_hashes = Vec::with_capacity(DATA_FRAGMENTS);
            for fragment in buf.chunks(fragment_size) {
                let fragment_hash = hash(fragment);
                if let Some(store) = &self.store {
                    store.put(&fragment_hash, fragment)?;
                }
                fragment_hashes.push(Digest(fragment_hash));
            }

            root.update(segment_hash.as_bytes());
            segments.push(SegmentDescriptor {
                index: segments.len() as u32,
                segment_hash,
                fragment_hashes,
            });

            if filled < buf.len() {
                break;
            }
        }

        if segments.is_empty() {
            return Err(FileProcessingError::EmptyFile(path.to_path_buf()));
        }

        let root = Digest(root.finalize());
        tracing::debug!(
            path = %path.display(),
            bytes = total_bytes,
            segments = segments.len(),
            root = %root,
            "file segmented"
        );

        Ok(ProcessedFile {
            path: path.to_path_buf(),
            segments,
            root,
            total_bytes,
        })
    }
}

/// Read until `buf` is full or EOF. Returns the number of bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
