/// Saved-snippet persistence over a single flat directory
///
/// Independent of the execution engine; nothing here runs code.
use crate::config::types::{ReplboxError, Result};
use crate::security::path_validation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Listing entry for one saved file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub size: u64,
    /// RFC 3339, UTC
    pub modified: String,
}

#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// The directory is created on first write, not here.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn save(&self, name: &str, content: &str) -> Result<()> {
        let path = path_validation::resolve_in(&self.root, name)?;
        fs::create_dir_all(&self.root)?;
        fs::write(&path, content)?;
        log::info!("Saved {} ({} bytes)", name, content.len());
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<String> {
        let path = path_validation::resolve_in(&self.root, name)?;
        fs::read_to_string(&path).map_err(|e| not_found_or_io(e, name))
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = path_validation::resolve_in(&self.root, name)?;
        fs::remove_file(&path).map_err(|e| not_found_or_io(e, name))?;
        log::info!("Deleted {}", name);
        Ok(())
    }

    /// Regular files only, newest first. A missing directory lists as empty.
    pub fn list(&self) -> Result<Vec<FileInfo>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = metadata.modified()?.into();
            files.push((
                modified,
                FileInfo {
                    filename: entry.file_name().to_string_lossy().into_owned(),
                    size: metadata.len(),
                    modified: modified.to_rfc3339(),
                },
            ));
        }

        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.filename.cmp(&b.1.filename)));
        Ok(files.into_iter().map(|(_, info)| info).collect())
    }
}

fn not_found_or_io(err: std::io::Error, name: &str) -> ReplboxError {
    if err.kind() == ErrorKind::NotFound {
        ReplboxError::NotFound(name.to_string())
    } else {
        ReplboxError::Io(err)
    }
}
