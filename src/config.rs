//! Configuration management
//!
//! Layers, lowest precedence first: built-in defaults, the YAML file, then
//! `CREDENTIAL_BROKER_*` environment variables (`__` separates nested keys,
//! e.g. `CREDENTIAL_BROKER_STAGES__PROD__ISSUER`).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use broker_core::{ClassTable, DurationPolicy, EnvironmentClass, humantime_serde, role};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "CREDENTIAL_BROKER_";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Stage used when none is given on the command line
    pub stage: String,
    /// Environment class used when none is given on the command line
    pub environment: EnvironmentClass,
    /// Identity provider and authorization service per stage
    pub stages: BTreeMap<String, StageConfig>,
    /// Browser login settings
    pub login: LoginConfig,
    /// Per-class session policy
    pub classes: ClassTable<ClassPolicy>,
    /// Secure store settings
    pub store: StoreConfig,
    /// Outbound HTTP settings
    pub http: HttpConfig,
    /// Authorization service settings (`serve`)
    pub server: ServerConfig,
    /// Web console sign-in settings (`console`)
    pub console: ConsoleConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            stage: "prod".to_string(),
            environment: EnvironmentClass::Standard,
            stages: BTreeMap::new(),
            login: LoginConfig::default(),
            classes: ClassTable {
                pci: ClassPolicy::restricted(),
                nonpci: ClassPolicy::standard(),
            },
            store: StoreConfig::default(),
            http: HttpConfig::default(),
            server: ServerConfig::default(),
            console: ConsoleConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Load configuration from file and environment.
    ///
    /// Without an explicit path the default location
    /// (`<config dir>/credential-broker/config.yaml`) is used when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        } else if let Some(p) = default_config_path().filter(|p| p.exists()) {
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Look up a configured stage.
    pub fn stage_config(&self, stage: &str) -> Result<&StageConfig> {
        self.stages
            .get(stage)
            .ok_or_else(|| Error::Config(format!("Unknown stage '{stage}'")))
    }

    /// Session policy for `class`.
    #[must_use]
    pub fn class_policy(&self, class: EnvironmentClass) -> &ClassPolicy {
        self.classes.get(class)
    }

    /// Directory holding the file-backed secure store.
    pub fn store_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.store.dir {
            return Ok(dir.clone());
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(".credential-broker").join("store"))
    }
}

/// Default configuration file location
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("credential-broker").join("config.yaml"))
}

/// Identity provider and authorization service for one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// OIDC issuer URL
    pub issuer: String,
    /// Authorization service endpoint
    pub authorization_service: String,
    /// OIDC client identifier per class
    pub client_ids: ClassTable<String>,
}

impl StageConfig {
    /// Client identifier registered for `class`.
    #[must_use]
    pub fn client_id(&self, class: EnvironmentClass) -> &str {
        self.client_ids.get(class)
    }
}

/// Browser login settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Loopback redirect URI registered with the identity provider.
    /// Port `0` binds an ephemeral port.
    pub redirect_uri: String,
    /// How long to wait for the browser to come back
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Re-activate the previously focused application after login (macOS)
    pub restore_focus: bool,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            redirect_uri: "http://localhost:5556/auth/callback".to_string(),
            timeout: Duration::from_secs(120),
            scopes: vec![
                "openid".to_string(),
                "offline_access".to_string(),
                "email".to_string(),
            ],
            restore_focus: true,
        }
    }
}

/// Session policy for one environment class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassPolicy {
    /// Assume-role duration bounds
    pub duration: DurationPolicy,
    /// How long past expiry an identity session may still be refreshed
    #[serde(with = "humantime_serde")]
    pub refresh_window: Duration,
    /// Minimum remaining lifetime for a cached cloud session to be reused
    #[serde(with = "humantime_serde")]
    pub resume_threshold: Duration,
}

impl ClassPolicy {
    /// Restricted class defaults
    #[must_use]
    pub const fn restricted() -> Self {
        Self {
            duration: DurationPolicy::restricted(),
            refresh_window: Duration::from_secs(15 * 60),
            resume_threshold: Duration::from_secs(60),
        }
    }

    /// Standard class defaults
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            duration: DurationPolicy::standard(),
            refresh_window: Duration::from_secs(4 * 60 * 60),
            resume_threshold: Duration::from_secs(5 * 60),
        }
    }
}

/// Secure store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store directory (default `~/.credential-broker/store`)
    pub dir: Option<PathBuf>,
}

/// Outbound HTTP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl HttpConfig {
    /// Build the shared HTTP client.
    pub fn client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("credential-broker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))
    }
}

/// Authorization service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Route the service is mounted at
    pub path: String,
    /// Stage assumed when the `Stage` header is absent
    pub default_stage: String,
    /// Class assumed when the `Environment` header is absent
    pub default_environment: EnvironmentClass,
    /// Role-name substring marking restricted roles
    pub restricted_marker: String,
    /// Directory service used to resolve group memberships
    pub directory: DirectoryConfig,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            path: "/".to_string(),
            default_stage: "prod".to_string(),
            default_environment: EnvironmentClass::Standard,
            restricted_marker: role::DEFAULT_RESTRICTED_MARKER.to_string(),
            directory: DirectoryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Web console sign-in settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Federation endpoint issuing sign-in tokens
    pub federation_url: String,
    /// Name shown by the console as the sign-in issuer
    pub issuer: String,
    /// Region to open the console in; the global console when unset
    pub region: Option<String>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            federation_url: "https://signin.aws.amazon.com/federation".to_string(),
            issuer: "credential-broker".to_string(),
            region: None,
        }
    }
}

/// Directory service settings.
///
/// With `url` set, memberships are fetched over HTTP; otherwise the static
/// `groups` table is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Directory lookup endpoint
    pub url: Option<String>,
    /// Static group memberships keyed by email
    pub groups: BTreeMap<String, Vec<String>>,
}
