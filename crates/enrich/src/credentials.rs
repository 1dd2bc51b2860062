//! Persisted service credentials.
//!
//! The title-lookup service wants a client id and a bearer token; users
//! supply them once and they persist in a per-user TOML file. Writes are
//! atomic (temp file + rename) so a crash mid-write can never leave a
//! half-written credentials file behind.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Unix timestamp the token expires at, when the service reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<i64>,
}

impl Credentials {
    /// Load credentials; a missing file is just empty credentials.
    pub fn load(path: &Path) -> Result<Credentials> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Credentials::default());
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Credentials),
        };
        toml::from_str(&text).or_raise(|| ErrorKind::Credentials)
    }

    /// Persist atomically: write a sibling temp file, then rename over the
    /// destination.
    pub fn store(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).or_raise(|| ErrorKind::Credentials)?;
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Credentials)?;

        let mut temp =
            tempfile::NamedTempFile::new_in(parent).or_raise(|| ErrorKind::Credentials)?;
        temp.write_all(text.as_bytes()).or_raise(|| ErrorKind::Credentials)?;
        temp.flush().or_raise(|| ErrorKind::Credentials)?;
        temp.persist(path).or_raise(|| ErrorKind::Credentials)?;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.client_id.is_some() && self.token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let creds = Credentials::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(creds, Credentials::default());
        assert!(!creds.is_complete());
    }

    #[test]
    fn store_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.toml");
        let creds = Credentials {
            client_id: Some("client-abc".into()),
            token: Some("bearer-xyz".into()),
            token_expires_at: Some(1_900_000_000),
        };
        creds.store(&path).unwrap();
        assert_eq!(Credentials::load(&path).unwrap(), creds);
        assert!(creds.is_complete());
    }

    #[test]
    fn store_overwrites_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.toml");
        Credentials { client_id: Some("old".into()), ..Default::default() }
            .store(&path)
            .unwrap();
        Credentials { client_id: Some("new".into()), ..Default::default() }
            .store(&path)
            .unwrap();
        let loaded = Credentials::load(&path).unwrap();
        assert_eq!(loaded.client_id.as_deref(), Some("new"));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.toml");
        std::fs::write(&path, "not = [valid").unwrap();
        assert!(Credentials::load(&path).is_err());
    }
}
