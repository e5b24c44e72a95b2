use super::StateStore;
use crate::error::StoreError;
use crate::state::StateRecord;
use async_trait::async_trait;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// JSON record on local disk.
///
/// Swaps are serialized across processes with an advisory `flock` on a
/// sibling `.lock` file; the record itself is replaced by write-to-temp,
/// fsync and rename so a crash never leaves a torn file behind.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStateStore {
    /// Open (or lazily create) the store at `path`
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::Write {
                location: parent.display().to_string(),
                details: format!("Failed to create state directory: {}", e),
            })?;
        }

        let lock_path = path.with_extension("lock");
        info!("Using file state store at {}", path.display());
        Ok(Self { path, lock_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Path, &Path) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();
        tokio::task::spawn_blocking(move || f(&path, &lock_path))
            .await
            .map_err(|e| StoreError::Backend {
                details: format!("State store task failed: {}", e),
            })?
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn read(&self) -> Result<StateRecord, StoreError> {
        self.blocking(|path, _| read_record(path)).await
    }

    async fn compare_and_swap(
        &self,
        expected: &StateRecord,
        mut next: StateRecord,
    ) -> Result<bool, StoreError> {
        let expected_revision = expected.revision;
        next.revision = expected_revision + 1;

        self.blocking(move |path, lock_path| {
            let _guard = FileLock::exclusive(lock_path)?;

            let current = read_record(path)?;
            if current.revision != expected_revision {
                debug!(
                    expected = expected_revision,
                    found = current.revision,
                    "file store swap rejected"
                );
                return Ok(false);
            }

            write_record(path, &next)?;
            Ok(true)
        })
        .await
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

fn read_record(path: &Path) -> Result<StateRecord, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StateRecord::initial()),
        Err(e) => {
            return Err(StoreError::Read {
                location: path.display().to_string(),
                details: e.to_string(),
            })
        }
    };

    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        details: format!("{}: {}", path.display(), e),
    })
}

fn write_record(path: &Path, record: &StateRecord) -> Result<(), StoreError> {
    let write_err = |e: std::io::Error| StoreError::Write {
        location: path.display().to_string(),
        details: e.to_string(),
    };

    let json = serde_json::to_vec_pretty(record).map_err(|e| StoreError::Write {
        location: path.display().to_string(),
        details: format!("Failed to encode record: {}", e),
    })?;

    let tmp_path = path.with_extension("tmp");
    let mut tmp = File::create(&tmp_path).map_err(write_err)?;
    tmp.write_all(&json).map_err(write_err)?;
    tmp.sync_all().map_err(write_err)?;
    drop(tmp);

    fs::rename(&tmp_path, path).map_err(write_err)?;

    // Persist the rename itself
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    debug!(revision = record.revision, "wrote state record to {}", path.display());
    Ok(())
}

/// Advisory exclusive lock held for the lifetime of the guard
struct FileLock {
    file: File,
}

impl FileLock {
    fn exclusive(lock_path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)
            .map_err(|e| StoreError::Lock {
                details: format!("Failed to open {}: {}", lock_path.display(), e),
            })?;

        flock(&file, true).map_err(|e| StoreError::Lock {
            details: format!("Failed to lock {}: {}", lock_path.display(), e),
        })?;

        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = flock(&self.file, false);
    }
}

#[cfg(unix)]
fn flock(file: &File, lock: bool) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let op = if lock { libc::LOCK_EX } else { libc::LOCK_UN };
    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn flock(_file: &File, _lock: bool) -> std::io::Result<()> {
    Ok(())
}
