//! Directory-backed artifact storage

use crate::error::TaskError;
use crate::task::{ArtifactRef, TaskId};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One PLY file per task, named `<task-id>.ply`.
///
/// Writes go to a hidden temporary file that is renamed into place, so a
/// reader never sees a partially written artifact.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) the artifact directory.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_ref(&self, id: TaskId) -> ArtifactRef {
        ArtifactRef::new(format!("{id}.ply"))
    }

    pub fn write(&self, id: TaskId, bytes: &[u8]) -> io::Result<ArtifactRef> {
        let artifact = self.artifact_ref(id);
        let final_path = self.dir.join(artifact.as_str());
        let temp_path = self.dir.join(format!(".{id}.ply.tmp"));

        let persist = || -> io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&temp_path, &final_path)
        };
        if let Err(e) = persist() {
            if let Err(cleanup) = fs::remove_file(&temp_path) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", temp_path.display(), cleanup);
                }
            }
            return Err(e);
        }

        debug!("Wrote {} bytes to {}", bytes.len(), final_path.display());
        Ok(artifact)
    }

    /// Filesystem path of a stored artifact.
    ///
    /// References that are not a bare `.ply` file name are rejected.
    pub fn path_of(&self, artifact: &ArtifactRef) -> Result<PathBuf, TaskError> {
        let name = artifact.as_str();
        let bare = Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
        if !bare || name.starts_with('.') || !name.ends_with(".ply") {
            return Err(TaskError::UnknownArtifact(name.to_string()));
        }
        Ok(self.dir.join(name))
    }

    pub fn fetch(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, TaskError> {
        let path = self.path_of(artifact)?;
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => TaskError::UnknownArtifact(artifact.to_string()),
            _ => TaskError::Storage(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("results")).unwrap();
        let id = TaskId::new();

        let artifact = store.write(id, b"ply\n").unwrap();
        assert_eq!(artifact.as_str(), format!("{id}.ply"));
        assert_eq!(store.fetch(&artifact).unwrap(), b"ply\n");

        let leftovers: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_failed_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let id = TaskId::new();
        let blocker = store.dir().join(format!("{id}.ply"));
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), b"x").unwrap();

        assert!(store.write(id, b"ply\n").is_err());

        let names: Vec<String> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{id}.ply")]);
        assert!(blocker.is_dir());
    }

    #[test]
    fn test_rejects_escaping_references() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        for name in ["../secret.ply", "/etc/passwd", "sub/x.ply", "x.txt", ".hidden.ply", ""] {
            assert!(
                matches!(
                    store.fetch(&ArtifactRef::new(name)),
                    Err(TaskError::UnknownArtifact(_))
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let missing = store.artifact_ref(TaskId::new());
        assert!(matches!(
            store.fetch(&missing),
            Err(TaskError::UnknownArtifact(_))
        ));
    }
}
