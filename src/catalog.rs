//! Local model-catalog and credential lookup.
//!
//! Two JSON files in the user config directory back analysis-model
//! resolution: `models.json` maps a provider id to its API base URL, and
//! `auth.json` holds per-provider credentials.

use crate::model::ModelRef;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// One provider entry in `models.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub base_url: String,
    /// Known model ids for this provider. Informational; resolution does not
    /// require the model to be listed.
    #[serde(default)]
    pub models: Vec<String>,
}

/// Provider id → API base URL catalog.
pub struct ModelCatalog {
    path: PathBuf,
}

impl ModelCatalog {
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("outrider");
        fs::create_dir_all(&config_dir)?;
        Ok(Self {
            path: config_dir.join("models.json"),
        })
    }

    /// Catalog backed by an explicit file path.
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    /// Resolve a model reference to its provider's API base URL.
    pub fn resolve(&self, model: &ModelRef) -> Result<String> {
        let entries = self.read_file()?;
        match entries.get(&model.provider) {
            Some(entry) => Ok(entry.base_url.clone()),
            None => bail!(
                "Provider '{}' not found in model catalog ({})",
                model.provider,
                self.path.display()
            ),
        }
    }

    fn read_file(&self) -> Result<HashMap<String, ProviderEntry>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let entries = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(entries)
    }
}

/// Stored credentials (API key or OAuth tokens).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    ApiKey { key: String },
    OAuth { access_token: String },
}

/// Storage file format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthFile {
    #[serde(flatten)]
    providers: HashMap<String, Credentials>,
}

/// Credential storage manager.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("outrider");
        fs::create_dir_all(&config_dir)?;
        Ok(Self {
            path: config_dir.join("auth.json"),
        })
    }

    /// Store backed by an explicit file path.
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    /// API key for a provider. Fails when the provider has no stored entry
    /// or the entry is not an API key (analysis calls cannot use OAuth).
    pub fn api_key(&self, provider: &str) -> Result<String> {
        let auth_file = self.read_file()?;
        match auth_file.providers.get(provider) {
            Some(Credentials::ApiKey { key }) => Ok(key.clone()),
            Some(Credentials::OAuth { .. }) => bail!(
                "Provider '{provider}' uses OAuth credentials; an API key is required"
            ),
            None => bail!("No credentials stored for provider '{provider}'"),
        }
    }

    /// Save credentials for a provider.
    pub fn save(&self, provider: &str, credentials: Credentials) -> Result<()> {
        let mut auth_file = self.read_file()?;
        auth_file
            .providers
            .insert(provider.to_string(), credentials);
        self.write_file(&auth_file)
    }

    fn read_file(&self) -> Result<AuthFile> {
        if !self.path.exists() {
            return Ok(AuthFile::default());
        }
        let content = fs::read_to_string(&self.path)?;
        let auth_file: AuthFile = serde_json::from_str(&content)?;
        Ok(auth_file)
    }

    fn write_file(&self, auth_file: &AuthFile) -> Result<()> {
        let content = serde_json::to_string_pretty(auth_file)?;
        fs::write(&self.path, content)?;

        // Set restrictive permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.path, permissions)?;
        }

        Ok(())
    }
}
