//! Host and credential models

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Deserialize;

/// A target machine
#[derive(Debug, Clone, PartialEq)]
pub struct Host {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub ip: String,
    pub os: Option<String>,
    pub credential_id: i64,
    pub metadata: Option<serde_json::Value>,
}

/// A credential record; `value` is only populated from the secret store at run time
#[derive(Debug)]
pub struct Credential {
    pub id: i64,
    pub name: String,
    pub credential_type: String,
    pub user_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub value: Option<CredentialSecret>,
}

impl Credential {
    /// Name the secret store keys this credential under
    pub fn secret_name(&self, user_id: &str) -> String {
        format!("{}-{}", self.name, user_id)
    }
}

/// Secret material resolved for a credential
#[derive(Debug)]
pub struct CredentialSecret {
    pub username: Option<String>,
    pub ssh_key: Option<SecretString>,
    pub password: Option<SecretString>,
}

#[derive(Deserialize)]
struct RawSecret {
    #[serde(default)]
    username: Option<String>,
    #[serde(default, rename = "sshKey")]
    ssh_key: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl CredentialSecret {
    /// Build from the key/value map returned by the secret store.
    ///
    /// Empty strings are treated as absent.
    pub fn from_map(map: serde_json::Map<String, serde_json::Value>) -> Result<Self, serde_json::Error> {
        let raw: RawSecret = serde_json::from_value(serde_json::Value::Object(map))?;
        Ok(Self {
            username: raw.username.filter(|u| !u.is_empty()),
            ssh_key: raw.ssh_key.filter(|k| !k.is_empty()).map(SecretString::from),
            password: raw.password.filter(|p| !p.is_empty()).map(SecretString::from),
        })
    }
}
