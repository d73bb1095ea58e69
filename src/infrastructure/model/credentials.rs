use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read credential file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Opaque source of the bearer token used against the completion provider.
/// Token state is owned here; callers never see how it was obtained.
pub trait CredentialProvider: Send + Sync {
    fn bearer(&self) -> Option<String>;
    fn refresh(&self) -> Result<(), CredentialError>;
}

/// Reads a key from a file on disk, falling back to an environment variable.
/// `refresh` re-reads the file so a rotated key applies without a restart.
pub struct FileCredential {
    path: Option<PathBuf>,
    env_var: String,
    cached: RwLock<Option<String>>,
}

impl FileCredential {
    pub fn new(path: Option<PathBuf>, env_var: impl Into<String>) -> Self {
        let credential = Self {
            path,
            env_var: env_var.into(),
            cached: RwLock::new(None),
        };
        if let Err(error) = credential.refresh() {
            warn!(%error, "Initial credential load failed; falling back to environment");
        }
        credential
    }

    fn read_sources(&self) -> Result<Option<String>, CredentialError> {
        if let Some(path) = &self.path {
            match fs::read_to_string(path) {
                Ok(content) => {
                    let trimmed = content.trim();
                    if !trimmed.is_empty() {
                        debug!(path = %path.display(), "Loaded credential from file");
                        return Ok(Some(trimmed.to_string()));
                    }
                }
                Err(source) if source.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(CredentialError::Io {
                        path: path.clone(),
                        source,
                    });
                }
            }
        }

        Ok(env::var(&self.env_var)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()))
    }
}

impl CredentialProvider for FileCredential {
    fn bearer(&self) -> Option<String> {
        self.cached.read().ok().and_then(|cached| cached.clone())
    }

    fn refresh(&self) -> Result<(), CredentialError> {
        let value = self.read_sources()?;
        if let Ok(mut cached) = self.cached.write() {
            *cached = value;
        }
        Ok(())
    }
}
