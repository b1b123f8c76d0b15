//! Service configuration (`scs.toml`).

use crate::bundle::{ComponentBundle, StackBundle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/scs/scs.toml";
pub const CONFIG_ENV: &str = "SCS_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("store.root must not be empty")]
    EmptyStoreRoot,
    #[error("unknown application flavour '{0}'")]
    UnknownApplication(String),
    #[error("missing configuration: {0}")]
    Missing(String),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ScsConfig {
    pub store: StoreSection,
    #[serde(default)]
    pub sql: Option<SqlSection>,
    #[serde(default)]
    pub triplestore: Option<TriplestoreSection>,
    #[serde(default)]
    pub containers: Option<ContainersSection>,
    /// Image per application flavour, keyed by stack bundle name.
    #[serde(default)]
    pub applications: BTreeMap<String, ApplicationSection>,
    #[serde(default)]
    pub restore: Option<RestoreSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SqlSection {
    #[serde(default = "default_sql_driver")]
    pub driver: String,
    #[serde(default = "default_sql_host")]
    pub host: String,
    #[serde(default = "default_sql_port")]
    pub port: u16,
    #[serde(default = "default_sql_user")]
    pub admin_user: String,
    #[serde(default)]
    pub admin_password: String,
    /// Host pattern used in `CREATE USER 'name'@'<pattern>'`.
    #[serde(default = "default_user_host")]
    pub user_host: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TriplestoreSection {
    #[serde(default = "default_http_driver")]
    pub driver: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ContainersSection {
    #[serde(default = "default_http_driver")]
    pub driver: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ApplicationSection {
    pub image: String,
    /// Extra environment passed to every container of this flavour.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RestoreSection {
    #[serde(default = "default_restore_image")]
    pub image: String,
    #[serde(default)]
    pub owner_uid: Option<u32>,
    #[serde(default)]
    pub owner_gid: Option<u32>,
}

impl Default for RestoreSection {
    fn default() -> Self {
        Self {
            image: default_restore_image(),
            owner_uid: None,
            owner_gid: None,
        }
    }
}

fn default_sql_driver() -> String {
    "cli".to_owned()
}

fn default_http_driver() -> String {
    "http".to_owned()
}

fn default_sql_host() -> String {
    "localhost".to_owned()
}

fn default_sql_port() -> u16 {
    3306
}

fn default_sql_user() -> String {
    "root".to_owned()
}

fn default_user_host() -> String {
    "%".to_owned()
}

fn default_restore_image() -> String {
    "alpine:3.20".to_owned()
}

impl ScsConfig {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let config: ScsConfig = toml::from_str(input)?;
        if config.store.root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyStoreRoot);
        }
        if let Some(key) = config
            .applications
            .keys()
            .find(|k| k.parse::<StackBundle>().is_err())
        {
            return Err(ConfigError::UnknownApplication(key.clone()));
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Path from `SCS_CONFIG`, or the system default.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
    }

    /// Minimal configuration with every backend on the in-memory mock driver.
    pub fn mock(root: impl Into<PathBuf>) -> Self {
        let mut applications = BTreeMap::new();
        for bundle in StackBundle::ALL {
            applications.insert(
                bundle.to_string(),
                ApplicationSection {
                    image: format!("{bundle}:test"),
                    env: BTreeMap::new(),
                },
            );
        }
        Self {
            store: StoreSection { root: root.into() },
            sql: Some(SqlSection {
                driver: "mock".to_owned(),
                host: default_sql_host(),
                port: default_sql_port(),
                admin_user: default_sql_user(),
                admin_password: String::new(),
                user_host: default_user_host(),
            }),
            triplestore: Some(TriplestoreSection {
                driver: "mock".to_owned(),
                url: String::new(),
                token: None,
            }),
            containers: Some(ContainersSection {
                driver: "mock".to_owned(),
                url: String::new(),
                token: None,
                network: None,
            }),
            applications,
            restore: Some(RestoreSection::default()),
        }
    }

    pub fn sql(&self) -> Result<&SqlSection, ConfigError> {
        self.sql
            .as_ref()
            .ok_or_else(|| ConfigError::Missing("[sql] section".to_owned()))
    }

    pub fn triplestore(&self) -> Result<&TriplestoreSection, ConfigError> {
        self.triplestore
            .as_ref()
            .ok_or_else(|| ConfigError::Missing("[triplestore] section".to_owned()))
    }

    pub fn containers(&self) -> Result<&ContainersSection, ConfigError> {
        self.containers
            .as_ref()
            .ok_or_else(|| ConfigError::Missing("[containers] section".to_owned()))
    }

    /// Application settings for an `*-app` component bundle.
    pub fn application(&self, bundle: ComponentBundle) -> Result<&ApplicationSection, ConfigError> {
        let flavour = match bundle {
            ComponentBundle::WisskiApp => StackBundle::Wisski,
            ComponentBundle::JupyterApp => StackBundle::Jupyter,
            ComponentBundle::NextcloudApp => StackBundle::Nextcloud,
            other => {
                return Err(ConfigError::Missing(format!(
                    "{other} is not an application bundle"
                )))
            }
        };
        self.applications
            .get(flavour.as_str())
            .filter(|a| !a.image.trim().is_empty())
            .ok_or_else(|| ConfigError::Missing(format!("[applications.{flavour}] image")))
    }

    pub fn restore(&self) -> RestoreSection {
        self.restore.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[store]
root = "/var/lib/scs"

[sql]
driver = "cli"
host = "db"
admin_password = "secret"

[triplestore]
url = "http://ts:7200"
token = "ts-token"

[containers]
url = "http://docker:2375"
network = "scs"

[applications.wisski]
image = "wisski/drupal:latest"

[applications.nextcloud]
image = "nextcloud:stable"
env = { NEXTCLOUD_TRUSTED_DOMAINS = "example.org" }

[restore]
owner_uid = 33
owner_gid = 33
"#;

    #[test]
    fn parses_full_config() {
        let config = ScsConfig::parse(FULL).expect("should parse");
        assert_eq!(config.store.root, PathBuf::from("/var/lib/scs"));
        let sql = config.sql().unwrap();
        assert_eq!(sql.host, "db");
        assert_eq!(sql.port, 3306);
        assert_eq!(sql.admin_user, "root");
        assert_eq!(config.triplestore().unwrap().driver, "http");
        assert_eq!(
            config.containers().unwrap().network.as_deref(),
            Some("scs")
        );
        assert_eq!(
            config.application(ComponentBundle::WisskiApp).unwrap().image,
            "wisski/drupal:latest"
        );
        assert_eq!(
            config
                .application(ComponentBundle::NextcloudApp)
                .unwrap()
                .env
                .get("NEXTCLOUD_TRUSTED_DOMAINS")
                .map(String::as_str),
            Some("example.org")
        );
        let restore = config.restore();
        assert_eq!(restore.image, "alpine:3.20");
        assert_eq!(restore.owner_uid, Some(33));
    }

    #[test]
    fn missing_sections_are_reported() {
        let config = ScsConfig::parse("[store]\nroot = \"/tmp/scs\"\n").unwrap();
        assert!(matches!(config.sql(), Err(ConfigError::Missing(_))));
        assert!(matches!(config.containers(), Err(ConfigError::Missing(_))));
        let err = config.application(ComponentBundle::JupyterApp).unwrap_err();
        assert!(err.to_string().contains("applications.jupyter"));
        assert_eq!(config.restore(), RestoreSection::default());
    }

    #[test]
    fn non_application_bundle_has_no_image() {
        let config = ScsConfig::parse(FULL).unwrap();
        assert!(config.application(ComponentBundle::Sql).is_err());
    }

    #[test]
    fn rejects_unknown_fields() {
        let input = "[store]\nroot = \"/x\"\nunknown = true\n";
        assert!(ScsConfig::parse(input).is_err());
    }

    #[test]
    fn rejects_unknown_application_flavour() {
        let input = "[store]\nroot = \"/x\"\n[applications.drupal]\nimage = \"d\"\n";
        assert!(matches!(
            ScsConfig::parse(input),
            Err(ConfigError::UnknownApplication(k)) if k == "drupal"
        ));
    }

    #[test]
    fn rejects_empty_root() {
        assert!(matches!(
            ScsConfig::parse("[store]\nroot = \"\"\n"),
            Err(ConfigError::EmptyStoreRoot)
        ));
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("scs.toml");
        let err = ScsConfig::load(&missing).unwrap_err();
        assert!(err.to_string().contains("scs.toml"));

        fs::write(&missing, FULL).unwrap();
        assert!(ScsConfig::load(&missing).is_ok());
    }

    #[test]
    fn mock_config_covers_every_application() {
        let config = ScsConfig::mock("/tmp/store");
        for bundle in ComponentBundle::ALL.into_iter().filter(|b| b.is_application()) {
            assert!(config.application(bundle).is_ok(), "{bundle}");
        }
        assert_eq!(config.sql().unwrap().driver, "mock");
    }
}
