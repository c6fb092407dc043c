/// Scratch directory and per-run working directories
///
/// Every run gets `<scratch>/<uuid>/`, holding its prepared source as
/// `<uuid>.<ext>` and anything the code itself writes there (it is also the
/// child's cwd, `HOME` and `TMPDIR`). The [`ScratchFile`] guard removes the
/// whole directory on every exit path, including panics and early returns, so
/// the scratch root only ever holds directories of in-flight runs.
use crate::config::types::{ReplboxError, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

const SCRATCH_DIR_MODE: u32 = 0o700;
const SCRATCH_FILE_MODE: u32 = 0o600;

/// Directory that holds in-flight script files.
#[derive(Clone, Debug)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Create (if needed) and lock down the scratch directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            ReplboxError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create scratch directory {}: {}", root.display(), e),
            ))
        })?;
        fs::set_permissions(&root, fs::Permissions::from_mode(SCRATCH_DIR_MODE))?;

        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create a fresh run directory and write `content` into it.
    pub fn create_file(&self, extension: &str, content: &[u8]) -> Result<ScratchFile> {
        let run_id = Uuid::new_v4().to_string();
        let dir = self.root.join(&run_id);
        fs::DirBuilder::new()
            .mode(SCRATCH_DIR_MODE)
            .create(&dir)
            .map_err(|e| {
                ReplboxError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create run directory {}: {}", dir.display(), e),
                ))
            })?;

        // From here on the guard owns the directory, so any failure below
        // still cleans up.
        let path = dir.join(format!("{}.{}", run_id, extension));
        let guard = ScratchFile {
            run_id,
            dir,
            path,
            removed: false,
        };
        let path = guard.path();

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(SCRATCH_FILE_MODE)
            .open(path)
            .map_err(|e| {
                ReplboxError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create script file {}: {}", path.display(), e),
                ))
            })?;

        file.write_all(content)?;
        file.sync_all()?;

        Ok(guard)
    }

    /// Number of entries currently in the directory.
    pub fn entry_count(&self) -> Result<usize> {
        Ok(fs::read_dir(&self.root)?.count())
    }

    /// Remove run directories (and bare script files from older layouts)
    /// older than `max_age` left behind by a crashed process. Only names this
    /// module would have generated are touched.
    pub fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !is_generated_name(&path) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            let result = if metadata.is_dir() {
                remove_run_dir(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to sweep stale script {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            log::info!("Swept {} stale script file(s) from {}", removed, self.root.display());
        }
        Ok(removed)
    }
}

/// `remove_dir_all`, retried once after restoring owner permissions on every
/// directory in the tree. Code running in the directory can `chmod` its own
/// subdirectories read-only, which makes their entries undeletable.
fn remove_run_dir(dir: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            restore_owner_access(dir);
            fs::remove_dir_all(dir)
        }
        other => other,
    }
}

fn restore_owner_access(dir: &Path) {
    let _ = fs::set_permissions(dir, fs::Permissions::from_mode(SCRATCH_DIR_MODE));
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        // Never follow symlinks out of the run directory.
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            restore_owner_access(&entry.path());
        }
    }
}

fn is_generated_name(path: &Path) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| Uuid::parse_str(stem).is_ok())
        .unwrap_or(false)
}

/// A run directory and its script, deleted together when dropped.
#[derive(Debug)]
pub struct ScratchFile {
    run_id: String,
    dir: PathBuf,
    path: PathBuf,
    removed: bool,
}

impl ScratchFile {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The script itself.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory private to this run; the child's cwd, `HOME` and `TMPDIR`.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Remove the run directory now (idempotent). A directory already gone
    /// counts as removed.
    pub fn cleanup(&mut self) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        match remove_run_dir(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.removed = true;
        Ok(())
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            log::warn!(
                "Failed to remove run directory {}: {}",
                self.dir.display(),
                e
            );
            crate::observability::audit::cleanup_failure(&self.run_id, e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_is_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let scratch = ScratchDir::new(temp.path().join("scratch")).unwrap();

        let path = {
            let file = scratch.create_file("py", b"print(1)").unwrap();
            assert_eq!(fs::read(file.path()).unwrap(), b"print(1)");
            assert!(file.path().ends_with(format!("{}.py", file.run_id())));
            assert_eq!(file.path().parent(), Some(file.dir()));
            fs::write(file.dir().join("written-by-code.txt"), b"x").unwrap();
            file.dir().to_path_buf()
        };

        assert!(!path.exists());
        assert_eq!(scratch.entry_count().unwrap(), 0);
    }

    #[test]
    fn names_are_unique() {
        let temp = TempDir::new().unwrap();
        let scratch = ScratchDir::new(temp.path()).unwrap();
        let a = scratch.create_file("py", b"").unwrap();
        let b = scratch.create_file("py", b"").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn cleanup_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let scratch = ScratchDir::new(temp.path()).unwrap();
        let mut file = scratch.create_file("py", b"x").unwrap();
        file.cleanup().unwrap();
        file.cleanup().unwrap();
        assert!(!file.path().exists());
    }

    #[test]
    fn scratch_dir_is_owner_only() {
        let temp = TempDir::new().unwrap();
        let scratch = ScratchDir::new(temp.path().join("s")).unwrap();
        let mode = fs::metadata(scratch.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn run_dir_is_owner_only() {
        let temp = TempDir::new().unwrap();
        let scratch = ScratchDir::new(temp.path()).unwrap();
        let file = scratch.create_file("py", b"x").unwrap();
        let mode = fs::metadata(file.dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn read_only_subdirectories_are_still_removed() {
        let temp = TempDir::new().unwrap();
        let scratch = ScratchDir::new(temp.path()).unwrap();
        let mut file = scratch.create_file("py", b"x").unwrap();

        let locked = file.dir().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("inner"), b"x").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o500)).unwrap();

        file.cleanup().unwrap();
        assert!(!file.dir().exists());
    }

    #[test]
    fn sweep_only_touches_generated_names() {
        let temp = TempDir::new().unwrap();
        let scratch = ScratchDir::new(temp.path()).unwrap();

        let stale = scratch.path().join(format!("{}.py", Uuid::new_v4()));
        fs::write(&stale, b"leftover").unwrap();
        let stale_dir = scratch.path().join(Uuid::new_v4().to_string());
        fs::create_dir(&stale_dir).unwrap();
        fs::write(stale_dir.join("leak.txt"), b"leftover").unwrap();
        let foreign = scratch.path().join("notes.txt");
        fs::write(&foreign, b"keep").unwrap();

        let removed = scratch.sweep_stale(Duration::ZERO).unwrap();
        assert_eq!(removed, 2);
        assert!(!stale.exists());
        assert!(!stale_dir.exists());
        assert!(foreign.exists());
    }

    #[test]
    fn sweep_keeps_recent_files() {
        let temp = TempDir::new().unwrap();
        let scratch = ScratchDir::new(temp.path()).unwrap();
        let _live = scratch.create_file("py", b"x").unwrap();
        assert_eq!(scratch.sweep_stale(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(scratch.entry_count().unwrap(), 1);
    }
}
