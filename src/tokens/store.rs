/*
 * File-backed persistence for user-added tokens
 */

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use crate::models::{AqyntError, Result};
use super::Token;

pub const CUSTOM_TOKENS_KEY: &str = "aqyntswap.custom-tokens";

/// Stores custom tokens under a fixed namespace key inside a JSON document, so
/// the same file can hold other client-side state later.
pub struct CustomTokenStore {
    path: PathBuf,
}

impl CustomTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<Token>> {
        let document = self.read_document()?;
        match document.get(CUSTOM_TOKENS_KEY) {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(Vec::new()),
        }
    }

    pub fn save(&self, tokens: &[Token]) -> Result<()> {
        let mut document = self.read_document()?;
        document.insert(CUSTOM_TOKENS_KEY.to_string(), serde_json::to_value(tokens)?);

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&document)?)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!("Persisted {} custom tokens to {}", tokens.len(), self.path.display());
        Ok(())
    }

    fn read_document(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                AqyntError::StorageError(format!("Corrupt token file {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}
