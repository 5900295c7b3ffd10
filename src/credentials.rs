//! Credential source backed by process environment variables.
//!
//! For each credential id `X`, the pair `CRED_X_USER` / `CRED_X_PASS` is
//! read once at startup; `CRED_X_KEY` optionally names a private key file,
//! in which case the password may be absent. `CRED_X_ENABLE` optionally
//! carries the privilege-elevation secret for vendors that require one.
//! Read-only afterwards.

use std::collections::HashMap;
use std::path::PathBuf;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::transport::AuthMethod;

/// One resolved credential.
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub secret: CredentialSecret,
    /// Privilege-elevation secret ("enable" password), when the vendor
    /// needs one.
    pub enable_password: Option<String>,
}

#[derive(Debug, Clone)]
pub enum CredentialSecret {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl Credential {
    /// The transport auth method for this credential.
    pub fn auth_method(&self) -> AuthMethod {
        match &self.secret {
            CredentialSecret::Password(p) => AuthMethod::Password(p.clone()),
            CredentialSecret::KeyFile { path, passphrase } => AuthMethod::PrivateKey {
                path: path.clone(),
                passphrase: passphrase.clone(),
            },
        }
    }
}

/// Immutable credential map, keyed by credential id.
#[derive(Debug, Clone, Default)]
pub struct CredentialSource {
    credentials: HashMap<String, Credential>,
}

static CRED_USER_VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^CRED_(.+)_USER$").unwrap());

impl CredentialSource {
    /// Scan the environment once for `CRED_<id>_USER` pairs.
    pub fn from_env() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        let mut credentials = HashMap::new();

        for name in vars.keys() {
            let Some(caps) = CRED_USER_VAR.captures(name) else {
                continue;
            };
            let id = caps[1].to_string();
            let username = vars[name].clone();
            if username.is_empty() {
                continue;
            }

            let password = vars.get(&format!("CRED_{}_PASS", id)).cloned();
            let key = vars.get(&format!("CRED_{}_KEY", id)).cloned();
            let enable_password = vars
                .get(&format!("CRED_{}_ENABLE", id))
                .cloned()
                .filter(|p| !p.is_empty());

            let secret = match (key, password) {
                (Some(key), password) if !key.is_empty() => CredentialSecret::KeyFile {
                    path: PathBuf::from(key),
                    passphrase: password.filter(|p| !p.is_empty()),
                },
                (_, Some(password)) if !password.is_empty() => {
                    CredentialSecret::Password(password)
                }
                // User variable alone is not a usable credential.
                _ => continue,
            };

            credentials.insert(
                id.clone(),
                Credential {
                    username,
                    secret,
                    enable_password,
                },
            );
            debug!("credential '{}' loaded from environment", id);
        }

        Self { credentials }
    }

    /// Build from explicit entries (tests, embedding).
    pub fn from_entries(entries: Vec<(String, Credential)>) -> Self {
        Self {
            credentials: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Credential> {
        self.credentials.get(id)
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Ids referenced by `wanted` that have no usable credential.
    pub fn missing_ids<'a>(&self, wanted: impl Iterator<Item = &'a str>) -> Vec<String> {
        let mut missing: Vec<String> = wanted
            .filter(|id| !id.is_empty() && !self.credentials.contains_key(*id))
            .map(str::to_string)
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password_cred(user: &str, pass: &str) -> Credential {
        Credential {
            username: user.to_string(),
            secret: CredentialSecret::Password(pass.to_string()),
            enable_password: None,
        }
    }

    #[test]
    fn test_lookup_and_missing() {
        let source = CredentialSource::from_entries(vec![
            ("1".to_string(), password_cred("admin", "secret")),
        ]);
        assert!(source.get("1").is_some());
        assert!(source.get("9").is_none());

        let missing = source.missing_ids(["1", "9", "9", ""].into_iter());
        assert_eq!(missing, vec!["9".to_string()]);
    }

    #[test]
    fn test_auth_method_mapping() {
        let cred = password_cred("admin", "secret");
        assert!(matches!(cred.auth_method(), AuthMethod::Password(p) if p == "secret"));

        let key = Credential {
            username: "admin".to_string(),
            secret: CredentialSecret::KeyFile {
                path: PathBuf::from("/keys/id_ed25519"),
                passphrase: None,
            },
            enable_password: None,
        };
        assert!(matches!(key.auth_method(), AuthMethod::PrivateKey { .. }));
    }

    #[test]
    fn test_enable_password_carried() {
        let cred = Credential {
            username: "admin".to_string(),
            secret: CredentialSecret::Password("secret".to_string()),
            enable_password: Some("enable-secret".to_string()),
        };
        assert_eq!(cred.enable_password.as_deref(), Some("enable-secret"));
        assert!(password_cred("admin", "secret").enable_password.is_none());
    }
}
