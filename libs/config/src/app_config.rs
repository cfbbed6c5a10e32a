//! Application Configuration Module
//!
//! Loads the client organizations this process acts for. The file keeps the
//! `fabricApp` layout: a `clientorgs` list plus one section per listed
//! organization naming its user, its organization id and the network
//! description to connect through.
//!
//! ```json
//! {
//!   "clientorgs": ["org1"],
//!   "org1": {
//!     "user": "User1",
//!     "orgid": "Org1",
//!     "networkconfigpath": "network/org1.yaml"
//!   }
//! }
//! ```

use crate::defaults::files::{APP_CONFIG_FILE, DEFAULT_APP_CONFIG_PATH, ENV_PREFIX};
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Settings of a single client organization
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ClientOrgSettings {
    /// User the organization signs invoke and query requests as
    pub user: String,

    /// Organization id inside the network description
    #[serde(rename = "orgid")]
    pub org_id: String,

    /// Path of the network description (YAML)
    #[serde(rename = "networkconfigpath")]
    pub network_config_path: PathBuf,
}

/// Raw file layout before the per-organization sections are picked out
#[derive(Debug, Deserialize)]
struct RawAppConfig {
    #[serde(rename = "clientorgs", default)]
    client_orgs: Vec<String>,

    #[serde(flatten)]
    sections: HashMap<String, serde_json::Value>,
}

/// Application configuration keyed by client organization
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    client_orgs: BTreeMap<String, ClientOrgSettings>,
}

impl AppConfig {
    /// Load configuration from a file or a directory holding `fabricApp.json`
    ///
    /// Keys can be overridden with `FABRIC__<ORG>__<KEY>` environment
    /// variables. Relative network description paths are resolved against
    /// the directory of the configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = if path.is_dir() {
            path.join(APP_CONFIG_FILE)
        } else {
            path.to_path_buf()
        };
        debug!("Loading application config: {:?}", file);

        let config = Config::builder()
            .add_source(File::from(file.as_path()).required(true))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to build configuration from {:?}", file))?;

        let raw: RawAppConfig = config
            .try_deserialize()
            .context("Failed to deserialize application configuration")?;

        let mut app = Self::from_raw(raw)?;
        app.expand_env_vars()?;
        if let Some(base) = file.parent() {
            app.resolve_relative_paths(base);
        }

        info!(
            "Loaded application config for {} client organization(s)",
            app.client_orgs.len()
        );
        Ok(app)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(json, FileFormat::Json))
            .build()
            .context("Failed to build configuration")?;

        let raw: RawAppConfig = config
            .try_deserialize()
            .context("Failed to deserialize application configuration")?;

        let mut app = Self::from_raw(raw)?;
        app.expand_env_vars()?;
        Ok(app)
    }

    fn from_raw(raw: RawAppConfig) -> Result<Self> {
        let mut client_orgs = BTreeMap::new();

        for org in raw.client_orgs {
            // Keys may come back lowercased depending on the source format
            let section = raw
                .sections
                .get(&org)
                .or_else(|| raw.sections.get(&org.to_lowercase()));

            match section {
                Some(value) => {
                    let settings: ClientOrgSettings = serde_json::from_value(value.clone())
                        .with_context(|| format!("Invalid settings for client org '{}'", org))?;
                    client_orgs.insert(org, settings);
                }
                None => warn!("Client org '{}' is listed but has no settings section", org),
            }
        }

        if client_orgs.is_empty() {
            bail!("No client organizations configured");
        }

        Ok(Self { client_orgs })
    }

    /// Build configuration directly from settings
    pub fn from_settings<I>(settings: I) -> Self
    where
        I: IntoIterator<Item = (String, ClientOrgSettings)>,
    {
        Self {
            client_orgs: settings.into_iter().collect(),
        }
    }

    /// Settings for a client organization
    pub fn client_org(&self, client_org: &str) -> Option<&ClientOrgSettings> {
        self.client_orgs.get(client_org)
    }

    /// Ids of all configured client organizations, sorted
    pub fn client_org_ids(&self) -> impl Iterator<Item = &str> {
        self.client_orgs.keys().map(String::as_str)
    }

    /// Expand environment variables in user names and paths
    fn expand_env_vars(&mut self) -> Result<()> {
        for (org, settings) in &mut self.client_orgs {
            let user = shellexpand::env(&settings.user)
                .with_context(|| format!("Failed to expand user of client org '{}'", org))?;
            settings.user = user.to_string();

            let raw_path = settings.network_config_path.to_string_lossy().to_string();
            let path = shellexpand::env(&raw_path).with_context(|| {
                format!("Failed to expand network config path of client org '{}'", org)
            })?;
            settings.network_config_path = PathBuf::from(path.as_ref());
        }

        Ok(())
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        for settings in self.client_orgs.values_mut() {
            if settings.network_config_path.is_relative() {
                settings.network_config_path = base.join(&settings.network_config_path);
            }
        }
    }
}

/// Convenience function to load configuration from the default location
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    AppConfig::load(path.unwrap_or(Path::new(DEFAULT_APP_CONFIG_PATH)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const APP_JSON: &str = r#"
{
  "clientorgs": ["org1", "org2"],
  "org1": {
    "user": "User1",
    "orgid": "Org1",
    "networkconfigpath": "network/org1.yaml"
  },
  "org2": {
    "user": "User2",
    "orgid": "Org2",
    "networkconfigpath": "/etc/fabric/org2.yaml"
  }
}
"#;

    #[test]
    fn test_load_app_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(APP_CONFIG_FILE);
        fs::write(&config_path, APP_JSON).unwrap();

        let config = AppConfig::load(dir.path()).unwrap();

        let ids: Vec<&str> = config.client_org_ids().collect();
        assert_eq!(ids, vec!["org1", "org2"]);

        let org1 = config.client_org("org1").unwrap();
        assert_eq!(org1.user, "User1");
        assert_eq!(org1.org_id, "Org1");
        assert_eq!(
            org1.network_config_path,
            dir.path().join("network/org1.yaml")
        );

        let org2 = config.client_org("org2").unwrap();
        assert_eq!(org2.network_config_path, PathBuf::from("/etc/fabric/org2.yaml"));
    }

    #[test]
    fn test_listed_org_without_section_is_skipped() {
        let json = r#"
{
  "clientorgs": ["org1", "ghost"],
  "org1": { "user": "User1", "orgid": "Org1", "networkconfigpath": "org1.yaml" }
}
"#;
        let config = AppConfig::from_json(json).unwrap();
        assert!(config.client_org("org1").is_some());
        assert!(config.client_org("ghost").is_none());
    }

    #[test]
    fn test_empty_client_orgs_rejected() {
        let json = r#"{ "clientorgs": [] }"#;
        assert!(AppConfig::from_json(json).is_err());
    }

    #[test]
    fn test_user_env_expansion() {
        std::env::set_var("FABRIC_TEST_APP_USER", "Auditor");
        let json = r#"
{
  "clientorgs": ["org1"],
  "org1": { "user": "$FABRIC_TEST_APP_USER", "orgid": "Org1", "networkconfigpath": "org1.yaml" }
}
"#;
        let config = AppConfig::from_json(json).unwrap();
        assert_eq!(config.client_org("org1").unwrap().user, "Auditor");
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(AppConfig::load(&dir.path().join("absent.json")).is_err());
    }
}
