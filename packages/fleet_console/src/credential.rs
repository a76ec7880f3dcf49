use std::path::PathBuf;

use push_channel::CredentialSource;
use tracing::warn;

use crate::config::AuthFileConfig;

/// Bearer token from config. When a token file is set it is re-read on every
/// call so a token rotated on disk reaches the next reconnect.
#[derive(Clone, Debug)]
pub struct ConfigCredential {
    token: Option<String>,
    token_file: Option<PathBuf>,
}

impl ConfigCredential {
    pub fn from_config(auth: &AuthFileConfig) -> Self {
        Self {
            token: auth.token.clone().filter(|t| !t.trim().is_empty()),
            token_file: auth.token_file.clone(),
        }
    }
}

impl CredentialSource for ConfigCredential {
    fn bearer(&self) -> Option<String> {
        if let Some(path) = &self.token_file {
            match std::fs::read_to_string(path) {
                Ok(contents) => {
                    let token = contents.trim();
                    if !token.is_empty() {
                        return Some(token.to_string());
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read token file");
                }
            }
        }
        self.token.clone()
    }
}
