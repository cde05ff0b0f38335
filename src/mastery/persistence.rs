use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::mastery::state::SkillState;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no skill state at {}", .0.display())]
    NotFound(PathBuf),
    #[error("skill state already exists at {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed skill state at {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive hold on a skill record for one load/operate/save cycle.
pub struct StateLock {
    file: File,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Skill state kept as a pretty-printed JSON document.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn lock(&self) -> Result<StateLock, StoreError> {
        self.ensure_parent()?;
        let lock_path = self.sibling("lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| StoreError::Lock {
                path: lock_path.clone(),
                source,
            })?;
        file.lock_exclusive().map_err(|source| StoreError::Lock {
            path: lock_path,
            source,
        })?;
        Ok(StateLock { file })
    }

    pub fn load(&self) -> Result<SkillState, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.clone()))
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let mut state: SkillState =
            serde_json::from_str(&raw).map_err(|source| StoreError::Malformed {
                path: self.path.clone(),
                source,
            })?;
        state.policy = state.policy.sanitized();
        state.difficulty = crate::mastery::types::clamp01(state.difficulty);
        let current = state.current_stage.clone();
        state.ensure_stage(&current);
        let drill = state.current_drill_id.clone();
        state.ensure_drill(&drill);

        tracing::debug!(
            path = %self.path.display(),
            attempts = state.history.len(),
            "skill state loaded"
        );
        Ok(state)
    }

    /// Loads the state, seeding a default one when the file does not exist.
    pub fn load_or_init(&self) -> Result<SkillState, StoreError> {
        match self.load() {
            Ok(state) => Ok(state),
            Err(StoreError::NotFound(path)) => {
                tracing::info!(path = %path.display(), "no skill state found, initialising default");
                let state = SkillState::default();
                self.save(&state)?;
                Ok(state)
            }
            Err(err) => Err(err),
        }
    }

    pub fn init(&self, force: bool) -> Result<SkillState, StoreError> {
        if self.exists() && !force {
            return Err(StoreError::AlreadyExists(self.path.clone()));
        }
        let state = SkillState::default();
        self.save(&state)?;
        Ok(state)
    }

    /// Writes to a sibling temp file and renames it over the target.
    pub fn save(&self, state: &SkillState) -> Result<(), StoreError> {
        self.ensure_parent()?;
        let json = serde_json::to_string_pretty(state).map_err(|source| StoreError::Malformed {
            path: self.path.clone(),
            source,
        })?;

        let tmp_path = self.sibling("tmp");
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| StoreError::Io { path, source }
        };

        let mut file = File::create(&tmp_path).map_err(io_err(&tmp_path))?;
        file.write_all(json.as_bytes()).map_err(io_err(&tmp_path))?;
        file.write_all(b"\n").map_err(io_err(&tmp_path))?;
        file.sync_all().map_err(io_err(&tmp_path))?;
        drop(file);
        fs::rename(&tmp_path, &self.path).map_err(io_err(&self.path))?;

        tracing::debug!(
            path = %self.path.display(),
            attempts = state.history.len(),
            "skill state saved"
        );
        Ok(())
    }

    fn ensure_parent(&self) -> Result<(), StoreError> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })
            }
            _ => Ok(()),
        }
    }

    fn sibling(&self, extension: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "skill_state.json".into());
        name.push(".");
        name.push(extension);
        self.path.with_file_name(name)
    }
}
