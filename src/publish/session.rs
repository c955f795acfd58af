//! Publish-target session persistence.
//!
//! The session is a cookie jar exported from the browser after login and
//! re-imported at session establishment. The target rotates cookies on use,
//! so the jar is rewritten after every confirmed publish.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app::{PortageError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the stored cookie jar. Absent file is `Ok(None)`, not an error;
    /// the caller decides whether that means authentication is required.
    pub fn load(&self) -> Result<Option<Vec<SessionCookie>>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        let cookies: Vec<SessionCookie> = serde_json::from_str(&content).map_err(|e| {
            PortageError::Session(format!("corrupt session file {}: {}", self.path.display(), e))
        })?;

        if cookies.is_empty() {
            return Ok(None);
        }
        Ok(Some(cookies))
    }

    pub fn save(&self, cookies: &[SessionCookie]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(cookies)
            .map_err(|e| PortageError::Session(format!("serializing session: {}", e)))?;

        // Write-then-rename so a crash never leaves a truncated jar.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
