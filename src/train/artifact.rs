//! Model artifact storage.
//!
//! ```text
//! <root>/
//!   0000000007-<uuid>.zst          # zstd-compressed artifact
//!   0000000007-<uuid>.zst.sha256   # hex SHA-256 of the uncompressed bytes
//! ```
//!
//! Sequence numbers increase with every save. Saving removes the oldest
//! artifacts first so that at most `retention` remain afterwards.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

const EXTENSION: &str = "zst";
const CHECKSUM_SUFFIX: &str = ".sha256";
const COMPRESSION_LEVEL: i32 = 3;

/// Errors raised by artifact storage.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("checksum mismatch for artifact {0}")]
    ChecksumMismatch(Uuid),

    #[error("artifact {0} has no checksum file")]
    MissingChecksum(Uuid),
}

/// Persists serialized models by identifier.
pub trait ArtifactStore {
    /// Saves an artifact, first removing superseded ones.
    fn save(&self, model_guid: Uuid, bytes: &[u8]) -> Result<(), ArtifactError>;

    /// Loads an artifact, `None` if it was never saved or has been superseded.
    fn load(&self, model_guid: Uuid) -> Result<Option<Vec<u8>>, ArtifactError>;
}

/// Directory-backed artifact store.
pub struct FileArtifactStore {
    root: PathBuf,
    retention: usize,
}

/// An artifact file found on disk.
struct Stored {
    sequence: u64,
    model_guid: Uuid,
    path: PathBuf,
}

impl FileArtifactStore {
    /// Creates a store rooted at the given directory. `retention` is at least 1.
    pub fn new(root: impl Into<PathBuf>, retention: usize) -> Result<Self, ArtifactError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            retention: retention.max(1),
        })
    }

    /// Stored artifacts, oldest first. Files that don't match the naming scheme are ignored.
    fn stored(&self) -> Result<Vec<Stored>, ArtifactError> {
        let mut stored = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some((sequence, model_guid)) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(parse_stem)
            else {
                continue;
            };
            stored.push(Stored {
                sequence,
                model_guid,
                path,
            });
        }
        stored.sort_by_key(|s| s.sequence);
        Ok(stored)
    }
}

impl ArtifactStore for FileArtifactStore {
    fn save(&self, model_guid: Uuid, bytes: &[u8]) -> Result<(), ArtifactError> {
        let stored = self.stored()?;
        let sequence = stored.last().map_or(1, |s| s.sequence + 1);

        let excess = (stored.len() + 1).saturating_sub(self.retention);
        for old in &stored[..excess] {
            remove_if_present(&old.path)?;
            remove_if_present(&checksum_path(&old.path))?;
            debug!(model_guid = %old.model_guid, "superseded artifact removed");
        }

        let path = self
            .root
            .join(format!("{sequence:010}-{model_guid}.{EXTENSION}"));
        let compressed = zstd::encode_all(bytes, COMPRESSION_LEVEL)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, compressed)?;
        fs::rename(&tmp, &path)?;
        fs::write(checksum_path(&path), hex::encode(Sha256::digest(bytes)))?;

        debug!(%model_guid, sequence, size = bytes.len(), "artifact saved");
        Ok(())
    }

    fn load(&self, model_guid: Uuid) -> Result<Option<Vec<u8>>, ArtifactError> {
        let Some(stored) = self
            .stored()?
            .into_iter()
            .find(|s| s.model_guid == model_guid)
        else {
            return Ok(None);
        };

        let expected = match fs::read_to_string(checksum_path(&stored.path)) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArtifactError::MissingChecksum(model_guid));
            }
            Err(e) => return Err(e.into()),
        };
        let bytes = zstd::decode_all(fs::File::open(&stored.path)?)?;
        if hex::encode(Sha256::digest(&bytes)) != expected.trim() {
            return Err(ArtifactError::ChecksumMismatch(model_guid));
        }
        Ok(Some(bytes))
    }
}

/// Parses `<sequence>-<uuid>`.
fn parse_stem(stem: &str) -> Option<(u64, Uuid)> {
    let (sequence, guid) = stem.split_once('-')?;
    Some((sequence.parse().ok()?, guid.parse().ok()?))
}

fn checksum_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(CHECKSUM_SUFFIX);
    PathBuf::from(name)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn test_store(retention: usize) -> (TempDir, FileArtifactStore) {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::new(dir.path().join("artifacts"), retention).unwrap();
        (dir, store)
    }

    fn artifact_files(dir: &TempDir) -> usize {
        fs::read_dir(dir.path().join("artifacts"))
            .unwrap()
            .filter(|e| {
                e.as_ref().unwrap().path().extension().and_then(|x| x.to_str()) == Some(EXTENSION)
            })
            .count()
    }

    #[test]
    fn save_and_load() {
        let (_dir, store) = test_store(1);
        let id = Uuid::new_v4();

        store.save(id, b"model bytes").unwrap();
        assert_eq!(store.load(id).unwrap().unwrap(), b"model bytes");
    }

    #[test]
    fn load_unknown_is_none() {
        let (_dir, store) = test_store(1);
        assert!(store.load(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn single_slot_retention_keeps_only_latest() {
        let (dir, store) = test_store(1);
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        store.save(first, b"one").unwrap();
        store.save(second, b"two").unwrap();

        assert!(store.load(first).unwrap().is_none());
        assert_eq!(store.load(second).unwrap().unwrap(), b"two");
        assert_eq!(artifact_files(&dir), 1);
    }

    #[test]
    fn retention_keeps_most_recent_saves() {
        let (dir, store) = test_store(2);
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            store.save(*id, id.as_bytes()).unwrap();
        }

        assert_eq!(artifact_files(&dir), 2);
        assert!(store.load(ids[1]).unwrap().is_none());
        assert!(store.load(ids[2]).unwrap().is_some());
        assert!(store.load(ids[3]).unwrap().is_some());
    }

    #[test]
    fn tampered_artifact_fails_checksum() {
        let (_dir, store) = test_store(1);
        let id = Uuid::new_v4();
        store.save(id, b"original").unwrap();

        let stored = store.stored().unwrap();
        fs::write(
            checksum_path(&stored[0].path),
            hex::encode(Sha256::digest(b"other")),
        )
        .unwrap();

        let err = store.load(id).unwrap_err();
        assert!(matches!(err, ArtifactError::ChecksumMismatch(_)));
    }

    #[test]
    fn missing_checksum_is_reported() {
        let (_dir, store) = test_store(1);
        let id = Uuid::new_v4();
        store.save(id, b"original").unwrap();
        fs::remove_file(checksum_path(&store.stored().unwrap()[0].path)).unwrap();

        let err = store.load(id).unwrap_err();
        assert!(matches!(err, ArtifactError::MissingChecksum(_)));
    }

    #[test]
    fn stray_files_are_ignored() {
        let (dir, store) = test_store(1);
        fs::write(dir.path().join("artifacts").join("notes.zst"), b"x").unwrap();

        let id = Uuid::new_v4();
        store.save(id, b"model").unwrap();
        assert!(store.load(id).unwrap().is_some());
    }
}
