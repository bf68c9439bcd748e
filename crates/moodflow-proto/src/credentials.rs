//! API credential store.
//!
//! Holds the token in memory and mirrors it to a small JSON file so it
//! survives restarts.  Persistence is strictly best-effort: a broken or
//! unwritable file is logged and otherwise ignored, so the caller never
//! fails because the disk did.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
struct CredentialFile {
    api_token: String,
}

pub struct CredentialStore {
    token: RwLock<Option<String>>,
    file: PathBuf,
}

impl CredentialStore {
    pub fn new(file: PathBuf) -> Self {
        Self {
            token: RwLock::new(None),
            file,
        }
    }

    /// Store a token and persist it.  Whitespace-only tokens clear the
    /// credential instead.
    pub fn set(&self, token: &str) {
        let trimmed = token.trim();
        let value = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        *self.token.write().expect("credential lock poisoned") = value.clone();

        match value {
            Some(api_token) => self.persist(CredentialFile { api_token }),
            None => {
                if self.file.exists() {
                    if let Err(e) = std::fs::remove_file(&self.file) {
                        warn!("could not remove credential file {:?}: {}", self.file, e);
                    }
                }
            }
        }
    }

    /// Load a previously saved token from disk.  Returns whether one
    /// was found.
    pub fn load(&self) -> bool {
        let content = match std::fs::read_to_string(&self.file) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("could not read credential file {:?}: {}", self.file, e);
                }
                return false;
            }
        };
        match serde_json::from_str::<CredentialFile>(&content) {
            Ok(parsed) if !parsed.api_token.trim().is_empty() => {
                *self.token.write().expect("credential lock poisoned") =
                    Some(parsed.api_token.trim().to_string());
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!("credential file {:?} is malformed: {}", self.file, e);
                false
            }
        }
    }

    pub fn has(&self) -> bool {
        self.token
            .read()
            .expect("credential lock poisoned")
            .is_some()
    }

    pub fn get(&self) -> Option<String> {
        self.token.read().expect("credential lock poisoned").clone()
    }

    fn persist(&self, file: CredentialFile) {
        if let Some(parent) = self.file.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("could not create credential directory {:?}: {}", parent, e);
                return;
            }
        }
        let json = match serde_json::to_string_pretty(&file) {
            Ok(j) => j,
            Err(e) => {
                warn!("could not serialize credential: {}", e);
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.file, json) {
            warn!("could not write credential file {:?}: {}", self.file, e);
        }
    }
}
