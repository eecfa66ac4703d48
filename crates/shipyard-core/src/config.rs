//! Deployment configuration (`shipyard.yaml`)
//!
//! The file is parsed once into an immutable [`DeployConfig`] and validated
//! before anything touches a cloud API. Credentials are resolved lazily from
//! the environment, falling back to inline values.

use crate::error::{ConfigError, Result};
use crate::naming::{Namer, hostname};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use shipyard_cloud::ProviderKind;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "shipyard.yaml";
pub const DEFAULT_KEEP_COUNT: usize = 2;
pub const DEFAULT_SSH_USER: &str = "deploy";
pub const DEFAULT_SCALEWAY_ZONE: &str = "fr-par-1";
pub const DEFAULT_VOLUME_SIZE_GB: u32 = 10;
pub const DEFAULT_HEALTH_PATH: &str = "/";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeployConfig {
    pub application: Application,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub cloudflare: Option<CloudflareConfig>,
    #[serde(default)]
    pub ssh: SshSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Application {
    pub name: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_keep_count")]
    pub keep_count: usize,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerGroup>,
    #[serde(default)]
    pub app: BTreeMap<String, AppService>,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    #[serde(default, deserialize_with = "string_map")]
    pub env: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "string_map")]
    pub secrets: BTreeMap<String, String>,
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_keep_count() -> usize {
    DEFAULT_KEEP_COUNT
}

impl Application {
    /// Old image tags kept after a deploy; zero falls back to the default
    pub fn retained_images(&self) -> usize {
        match self.keep_count {
            0 => DEFAULT_KEEP_COUNT,
            n => n,
        }
    }
}

/// One server group: `count` identical servers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerGroup {
    #[serde(default)]
    pub master: bool,
    /// Falls back to the provider's default type
    #[serde(default, rename = "type")]
    pub server_type: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeSpec>,
}

fn default_count() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VolumeSpec {
    #[serde(default = "default_volume_size")]
    pub size: u32,
}

fn default_volume_size() -> u32 {
    DEFAULT_VOLUME_SIZE_GB
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppService {
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub subdomain: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub healthcheck: Option<HealthCheck>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub pre_run_command: Option<String>,
    #[serde(default, deserialize_with = "string_map")]
    pub env: BTreeMap<String, String>,
    /// volume name -> container path
    #[serde(default)]
    pub mounts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HealthCheck {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl AppService {
    /// Web services listen on a port; everything else is a worker
    pub fn is_web(&self) -> bool {
        self.port.is_some_and(|p| p > 0)
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref().filter(|d| !d.is_empty())
    }

    pub fn hostname(&self) -> Option<String> {
        self.domain()
            .map(|domain| hostname(self.subdomain.as_deref(), domain))
    }

    /// Has a public hostname and a port to route it to
    pub fn is_tunneled(&self) -> bool {
        self.domain().is_some() && self.is_web()
    }

    pub fn health_path(&self) -> &str {
        self.healthcheck
            .as_ref()
            .and_then(|h| h.path.as_deref())
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_HEALTH_PATH)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseAdapter {
    #[serde(alias = "postgresql")]
    Postgres,
    Mysql,
    #[serde(alias = "sqlite3")]
    Sqlite,
}

impl DatabaseAdapter {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseAdapter::Postgres => "postgres",
            DatabaseAdapter::Mysql => "mysql",
            DatabaseAdapter::Sqlite => "sqlite",
        }
    }

    /// SQLite lives inside the app's volume; the others run as a StatefulSet
    pub fn needs_container(&self) -> bool {
        !matches!(self, DatabaseAdapter::Sqlite)
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            DatabaseAdapter::Postgres => Some(5432),
            DatabaseAdapter::Mysql => Some(3306),
            DatabaseAdapter::Sqlite => None,
        }
    }

    pub fn default_image(&self) -> Option<&'static str> {
        match self {
            DatabaseAdapter::Postgres => Some("postgres:15-alpine"),
            DatabaseAdapter::Mysql => Some("mysql:8.0"),
            DatabaseAdapter::Sqlite => None,
        }
    }

    pub fn data_path(&self) -> &'static str {
        match self {
            DatabaseAdapter::Postgres => "/var/lib/postgresql/data",
            DatabaseAdapter::Mysql => "/var/lib/mysql",
            DatabaseAdapter::Sqlite => "/app/data",
        }
    }

    /// Container env keys needed when no URL is given
    pub fn required_secrets(&self) -> &'static [&'static str] {
        match self {
            DatabaseAdapter::Postgres => &["POSTGRES_USER", "POSTGRES_PASSWORD", "POSTGRES_DB"],
            DatabaseAdapter::Mysql => &["MYSQL_USER", "MYSQL_PASSWORD", "MYSQL_DATABASE"],
            DatabaseAdapter::Sqlite => &[],
        }
    }
}

impl fmt::Display for DatabaseAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub servers: Vec<String>,
    pub adapter: DatabaseAdapter,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    /// volume name -> data path; at most one entry is used
    #[serde(default)]
    pub mount: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "string_map")]
    pub secrets: BTreeMap<String, String>,
}

impl DatabaseConfig {
    pub fn image(&self) -> Option<String> {
        self.image
            .clone()
            .filter(|i| !i.is_empty())
            .or_else(|| self.adapter.default_image().map(str::to_string))
    }

    fn url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| !u.is_empty())
    }

    /// Connection variables injected into every app service
    pub fn app_env(&self, host: &str) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("DATABASE_ADAPTER".to_string(), self.adapter.to_string());

        let secret = |key: &str| self.secrets.get(key).cloned().unwrap_or_default();
        match self.adapter {
            DatabaseAdapter::Sqlite => {
                let url = self
                    .url()
                    .unwrap_or("sqlite://data/db/production.sqlite3")
                    .to_string();
                env.insert("DATABASE_URL".to_string(), url);
            }
            DatabaseAdapter::Postgres => {
                let (user, password, db) = (
                    secret("POSTGRES_USER"),
                    secret("POSTGRES_PASSWORD"),
                    secret("POSTGRES_DB"),
                );
                let url = self.url().map(str::to_string).unwrap_or_else(|| {
                    format!("postgresql://{}:{}@{}:5432/{}", user, password, host, db)
                });
                env.insert("DATABASE_URL".to_string(), url);
                env.insert("POSTGRES_HOST".to_string(), host.to_string());
                env.insert("POSTGRES_PORT".to_string(), "5432".to_string());
                env.insert("POSTGRES_USER".to_string(), user);
                env.insert("POSTGRES_PASSWORD".to_string(), password);
                env.insert("POSTGRES_DB".to_string(), db);
            }
            DatabaseAdapter::Mysql => {
                let (user, password, db) = (
                    secret("MYSQL_USER"),
                    secret("MYSQL_PASSWORD"),
                    secret("MYSQL_DATABASE"),
                );
                let url = self.url().map(str::to_string).unwrap_or_else(|| {
                    format!("mysql://{}:{}@{}:3306/{}", user, password, host, db)
                });
                env.insert("DATABASE_URL".to_string(), url);
                env.insert("MYSQL_HOST".to_string(), host.to_string());
                env.insert("MYSQL_PORT".to_string(), "3306".to_string());
                env.insert("MYSQL_USER".to_string(), user);
                env.insert("MYSQL_PASSWORD".to_string(), password);
                env.insert("MYSQL_DATABASE".to_string(), db);
            }
        }
        env
    }
}

/// Auxiliary workload from a stock image (cache, queue, ...)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub servers: Vec<String>,
    pub image: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default, deserialize_with = "string_map")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub mount: BTreeMap<String, String>,
}

impl ServiceConfig {
    /// Explicit port, else the well-known port of the image
    pub fn port(&self) -> Option<u16> {
        self.port
            .filter(|p| *p > 0)
            .or_else(|| infer_port(&self.image))
    }
}

fn infer_port(image: &str) -> Option<u16> {
    const KNOWN: &[(&str, u16)] = &[
        ("redis", 6379),
        ("postgres", 5432),
        ("mysql", 3306),
        ("memcache", 11211),
        ("mongo", 27017),
        ("elastic", 9200),
    ];
    KNOWN
        .iter()
        .find(|(needle, _)| image.contains(needle))
        .map(|(_, port)| *port)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub hetzner: Option<HetznerConfig>,
    #[serde(default)]
    pub aws: Option<AwsConfig>,
    #[serde(default)]
    pub scaleway: Option<ScalewayConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HetznerConfig {
    #[serde(default)]
    pub api_token: Option<String>,
    pub server_type: String,
    pub server_location: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AwsConfig {
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    pub region: String,
    pub instance_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScalewayConfig {
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_scaleway_zone")]
    pub zone: String,
    pub server_type: String,
}

fn default_scaleway_zone() -> String {
    DEFAULT_SCALEWAY_ZONE.to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CloudflareConfig {
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshSettings {
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    #[serde(default)]
    pub public_key: Option<PathBuf>,
    #[serde(default = "default_ssh_user")]
    pub user: String,
}

fn default_ssh_user() -> String {
    DEFAULT_SSH_USER.to_string()
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            private_key: None,
            public_key: None,
            user: default_ssh_user(),
        }
    }
}

impl SshSettings {
    pub fn private_key_path(&self) -> Result<PathBuf> {
        match &self.private_key {
            Some(path) => expand_home(path),
            None => default_key_path("id_ed25519"),
        }
    }

    pub fn public_key_path(&self) -> Result<PathBuf> {
        match &self.public_key {
            Some(path) => expand_home(path),
            None => default_key_path("id_ed25519.pub"),
        }
    }

    pub fn read_public_key(&self) -> Result<String> {
        let path = self.public_key_path()?;
        let key = std::fs::read_to_string(&path).map_err(|e| {
            ConfigError::Validation(format!("cannot read SSH public key {}: {}", path.display(), e))
        })?;
        Ok(key.trim().to_string())
    }
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .ok_or_else(|| ConfigError::Validation("cannot determine home directory".to_string()))
}

fn default_key_path(file: &str) -> Result<PathBuf> {
    Ok(home_dir()?.join(".ssh").join(file))
}

fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => Ok(home_dir()?.join(rest)),
        Err(_) => Ok(path.to_path_buf()),
    }
}

/// Resolved compute credentials
#[derive(Clone)]
pub enum ProviderCredentials {
    Hetzner {
        token: String,
    },
    Aws {
        access_key_id: String,
        secret_access_key: String,
        region: String,
    },
    Scaleway {
        secret_key: String,
        project_id: String,
        zone: String,
    },
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderCredentials::Hetzner { .. } => f.write_str("Hetzner { token: *** }"),
            ProviderCredentials::Aws { region, .. } => {
                write!(f, "Aws {{ region: {}, keys: *** }}", region)
            }
            ProviderCredentials::Scaleway { zone, project_id, .. } => write!(
                f,
                "Scaleway {{ zone: {}, project_id: {}, secret_key: *** }}",
                zone, project_id
            ),
        }
    }
}

#[derive(Clone)]
pub struct CloudflareCredentials {
    pub api_token: String,
    pub account_id: String,
}

impl fmt::Debug for CloudflareCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudflareCredentials")
            .field("api_token", &"***")
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Environment first, then the inline value; empty strings count as unset
fn credential(var: &str, inline: Option<&str>) -> Result<String> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| inline.filter(|v| !v.is_empty()).map(str::to_string))
        .ok_or_else(|| ConfigError::MissingCredential(var.to_string()))
}

fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

impl DeployConfig {
    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loaded config file");
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let config: DeployConfig = serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let app = &self.application;
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        self.provider_kind()?;

        if !is_dns_label(&app.name) {
            return invalid(format!(
                "application.name '{}' must be lowercase letters, digits and hyphens",
                app.name
            ));
        }

        let has_workloads = !app.app.is_empty() || app.database.is_some() || !app.services.is_empty();
        if app.servers.is_empty() && has_workloads {
            return invalid("servers must be defined when deploying services".to_string());
        }

        for (name, group) in &app.servers {
            if !is_dns_label(name) {
                return invalid(format!(
                    "server group '{}' must be lowercase letters, digits and hyphens",
                    name
                ));
            }
            if group.count < 1 {
                return invalid(format!("servers.{}: count must be at least 1", name));
            }
        }

        let masters = app.servers.values().filter(|g| g.master).count();
        if masters > 1 {
            return invalid(format!("only one server group can have master: true, found {}", masters));
        }
        if app.servers.len() > 1 && masters == 0 {
            return invalid(
                "when multiple server groups are defined, exactly one must have master: true"
                    .to_string(),
            );
        }

        let check_refs = |owner: &str, servers: &[String]| -> Result<()> {
            if servers.is_empty() {
                return Err(ConfigError::Validation(format!("{}: servers field is required", owner)));
            }
            for server in servers {
                if !app.servers.contains_key(server) {
                    return Err(ConfigError::Validation(format!(
                        "{}: references undefined server '{}'",
                        owner, server
                    )));
                }
            }
            Ok(())
        };

        for (name, svc) in &app.app {
            let owner = format!("app.{}", name);
            check_refs(&owner, &svc.servers)?;

            if !svc.mounts.is_empty() {
                if svc.servers.len() != 1 {
                    return invalid(format!(
                        "{} runs on {} server groups and cannot have mounts; volumes are server-local",
                        owner,
                        svc.servers.len()
                    ));
                }
                let group_name = &svc.servers[0];
                let group = &app.servers[group_name];
                for volume in svc.mounts.keys() {
                    if !group.volumes.contains_key(volume) {
                        let available = group.volumes.keys().cloned().collect::<Vec<_>>();
                        return invalid(format!(
                            "{} mounts '{}' but server group '{}' has no such volume (available: {})",
                            owner,
                            volume,
                            group_name,
                            if available.is_empty() { "none".to_string() } else { available.join(", ") }
                        ));
                    }
                }
            }
        }

        if let Some(db) = &app.database {
            check_refs("database", &db.servers)?;
            if db.url().is_none() {
                for key in db.adapter.required_secrets() {
                    if !db.secrets.contains_key(*key) {
                        return invalid(format!(
                            "{} database requires {} in secrets (or provide database.url)",
                            db.adapter, key
                        ));
                    }
                }
            }
            if let Some(volume) = db.mount.keys().next() {
                let group = &app.servers[&db.servers[0]];
                if !group.volumes.contains_key(volume) {
                    return invalid(format!(
                        "database mounts '{}' but server group '{}' has no such volume",
                        volume, db.servers[0]
                    ));
                }
            }
        }

        for (name, svc) in &app.services {
            check_refs(&format!("services.{}", name), &svc.servers)?;
        }

        let mut seen: HashMap<String, &str> = HashMap::new();
        for (name, svc) in &app.app {
            if let Some(host) = svc.hostname() {
                if let Some(previous) = seen.insert(host.clone(), name) {
                    return invalid(format!(
                        "domain '{}' used by both '{}' and '{}'",
                        host, previous, name
                    ));
                }
            }
        }

        Ok(())
    }

    /// Branch deployments get their own resources and hostnames
    pub fn with_branch(mut self, branch: &str) -> Result<Self> {
        if !is_dns_label(branch) {
            return Err(ConfigError::Validation(format!(
                "invalid branch '{}': lowercase letters, digits and hyphens only",
                branch
            )));
        }
        self.application.name = format!("{}-{}", self.application.name, branch);
        for svc in self.application.app.values_mut() {
            svc.subdomain = Some(match svc.subdomain.as_deref() {
                None | Some("") | Some("@") => branch.to_string(),
                Some(sub) => format!("{}-{}", branch, sub),
            });
        }
        Ok(self)
    }

    pub fn provider_kind(&self) -> Result<ProviderKind> {
        let p = &self.provider;
        let configured: Vec<ProviderKind> = [
            p.hetzner.as_ref().map(|_| ProviderKind::Hetzner),
            p.aws.as_ref().map(|_| ProviderKind::Aws),
            p.scaleway.as_ref().map(|_| ProviderKind::Scaleway),
        ]
        .into_iter()
        .flatten()
        .collect();

        match configured.as_slice() {
            [kind] => Ok(*kind),
            [] => Err(ConfigError::Validation(
                "compute provider required: configure one of hetzner, aws or scaleway".to_string(),
            )),
            _ => Err(ConfigError::Validation(
                "only one compute provider may be configured".to_string(),
            )),
        }
    }

    /// Provider-wide server type
    pub fn default_server_type(&self) -> &str {
        let p = &self.provider;
        if let Some(h) = &p.hetzner {
            &h.server_type
        } else if let Some(a) = &p.aws {
            &a.instance_type
        } else if let Some(s) = &p.scaleway {
            &s.server_type
        } else {
            ""
        }
    }

    /// Location, region or zone, depending on the provider
    pub fn default_location(&self) -> &str {
        let p = &self.provider;
        if let Some(h) = &p.hetzner {
            &h.server_location
        } else if let Some(a) = &p.aws {
            &a.region
        } else if let Some(s) = &p.scaleway {
            &s.zone
        } else {
            ""
        }
    }

    pub fn server_type_for(&self, group: &ServerGroup) -> String {
        group
            .server_type
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.default_server_type().to_string())
    }

    pub fn location_for(&self, group: &ServerGroup) -> String {
        group
            .location
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.default_location().to_string())
    }

    pub fn provider_credentials(&self) -> Result<ProviderCredentials> {
        let p = &self.provider;
        match self.provider_kind()? {
            ProviderKind::Hetzner => {
                let h = p.hetzner.as_ref();
                Ok(ProviderCredentials::Hetzner {
                    token: credential("HCLOUD_TOKEN", h.and_then(|h| h.api_token.as_deref()))?,
                })
            }
            ProviderKind::Aws => {
                let a = p.aws.as_ref();
                Ok(ProviderCredentials::Aws {
                    access_key_id: credential(
                        "AWS_ACCESS_KEY_ID",
                        a.and_then(|a| a.access_key_id.as_deref()),
                    )?,
                    secret_access_key: credential(
                        "AWS_SECRET_ACCESS_KEY",
                        a.and_then(|a| a.secret_access_key.as_deref()),
                    )?,
                    region: self.default_location().to_string(),
                })
            }
            ProviderKind::Scaleway => {
                let s = p.scaleway.as_ref();
                Ok(ProviderCredentials::Scaleway {
                    secret_key: credential("SCW_SECRET_KEY", s.and_then(|s| s.secret_key.as_deref()))?,
                    project_id: credential(
                        "SCW_DEFAULT_PROJECT_ID",
                        s.and_then(|s| s.project_id.as_deref()),
                    )?,
                    zone: self.default_location().to_string(),
                })
            }
        }
    }

    pub fn cloudflare_credentials(&self) -> Result<CloudflareCredentials> {
        let cf = self.cloudflare.as_ref();
        Ok(CloudflareCredentials {
            api_token: credential(
                "CLOUDFLARE_API_TOKEN",
                cf.and_then(|c| c.api_token.as_deref()),
            )?,
            account_id: credential(
                "CLOUDFLARE_ACCOUNT_ID",
                cf.and_then(|c| c.account_id.as_deref()),
            )?,
        })
    }

    /// The group hosting the control plane: the flagged one, or the only one
    pub fn master_group(&self) -> Option<&str> {
        let servers = &self.application.servers;
        servers
            .iter()
            .find(|(_, g)| g.master)
            .map(|(name, _)| name.as_str())
            .or_else(|| match servers.len() {
                1 => servers.keys().next().map(String::as_str),
                _ => None,
            })
    }

    pub fn namer(&self) -> Namer {
        Namer::new(&self.application.name)
    }

    /// Apps that get a public tunnel
    pub fn tunneled_apps(&self) -> impl Iterator<Item = (&String, &AppService)> {
        self.application.app.iter().filter(|(_, svc)| svc.is_tunneled())
    }

    /// Everything an app container sees, later entries winning:
    /// deploy env, database connection, shared env, secrets, service env
    pub fn env_for_service(&self, service: &str) -> BTreeMap<String, String> {
        let app = &self.application;
        let mut env = BTreeMap::new();
        env.insert("DEPLOY_ENV".to_string(), app.environment.clone());

        if let Some(db) = &app.database {
            env.extend(db.app_env(&self.namer().database_name()));
        }
        env.extend(app.env.clone());
        env.extend(app.secrets.clone());
        if let Some(svc) = app.app.get(service) {
            env.extend(svc.env.clone());
        }
        env
    }
}

/// Accept scalar YAML values (numbers, booleans) where strings are expected
fn string_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_yaml::Value>>::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Null => String::new(),
                _ => {
                    return Err(D::Error::custom(format!(
                        "{}: expected a string, number or boolean",
                        key
                    )));
                }
            };
            Ok((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
application:
  name: myapp
  servers:
    master: { type: cx22, count: 1, volumes: { data: { size: 20 } } }
  app:
    web:
      servers: [master]
      domain: example.com
      subdomain: www
      port: 3000
      env: { WORKERS: 4, DEBUG: false }
      mounts: { data: /app/storage }
provider:
  hetzner: { server_type: cx22, server_location: fsn1 }
"#;

    fn parse(text: &str) -> Result<DeployConfig> {
        DeployConfig::parse(text, Path::new("shipyard.yaml"))
    }

    /// Splice extra `application:` keys in front of the provider block
    fn with_application(extra: &str) -> String {
        MINIMAL.replace("provider:", &format!("{}provider:", extra))
    }

    #[test]
    fn test_parse_minimal() {
        let config = parse(MINIMAL).unwrap();
        let app = &config.application;
        assert_eq!(app.environment, "production");
        assert_eq!(app.keep_count, 2);
        assert_eq!(app.retained_images(), 2);
        assert_eq!(app.servers["master"].volumes["data"].size, 20);
        assert_eq!(app.app["web"].env["WORKERS"], "4");
        assert_eq!(app.app["web"].env["DEBUG"], "false");
        assert_eq!(app.app["web"].hostname().as_deref(), Some("www.example.com"));
        assert_eq!(config.provider_kind().unwrap(), ProviderKind::Hetzner);
        assert_eq!(config.ssh.user, "deploy");
    }

    #[test]
    fn test_zero_keep_count_falls_back_to_default() {
        let config = parse(&MINIMAL.replace("  name: myapp\n", "  name: myapp\n  keep_count: 0\n")).unwrap();
        assert_eq!(config.application.keep_count, 0);
        assert_eq!(config.application.retained_images(), DEFAULT_KEEP_COUNT);
    }

    #[test]
    fn test_master_group_single_group_fallback() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.master_group(), Some("master"));
    }

    #[test]
    fn test_master_group_prefers_flag() {
        let text = MINIMAL.replace(
            "    master: { type: cx22, count: 1, volumes: { data: { size: 20 } } }",
            "    master: { type: cx22, count: 1, volumes: { data: { size: 20 } } }\n    \
             a: { count: 2 }\n    b: { count: 1, master: true }",
        );
        // two groups besides "master" and no flag on "master": b wins
        let config = parse(&text).unwrap();
        assert_eq!(config.master_group(), Some("b"));
    }

    #[test]
    fn test_multiple_groups_require_master() {
        let text = MINIMAL.replace(
            "    master: { type: cx22, count: 1, volumes: { data: { size: 20 } } }",
            "    master: { type: cx22, count: 1, volumes: { data: { size: 20 } } }\n    \
             workers: { count: 2 }",
        );
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("exactly one must have master: true"));
    }

    #[test]
    fn test_two_masters_rejected() {
        let text = MINIMAL.replace(
            "    master: { type: cx22, count: 1,",
            "    other: { master: true }\n    master: { master: true, type: cx22, count: 1,",
        );
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("only one server group"));
    }

    #[test]
    fn test_undefined_server_reference() {
        let text = with_application(
            "  services:\n    redis: { servers: [cache], image: redis:7-alpine }\n",
        );
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("undefined server 'cache'"));
    }

    #[test]
    fn test_mount_must_name_group_volume() {
        let text = MINIMAL.replace("mounts: { data: /app/storage }", "mounts: { uploads: /app/up }");
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("has no such volume"));
    }

    #[test]
    fn test_duplicate_hostname_rejected() {
        let text = MINIMAL.replace(
            "provider:",
            "    api:\n      servers: [master]\n      domain: example.com\n      subdomain: www\n      port: 4000\nprovider:",
        );
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("www.example.com"));
    }

    #[test]
    fn test_exactly_one_provider() {
        let text = MINIMAL.replace(
            "provider:\n",
            "provider:\n  aws: { region: eu-west-1, instance_type: t3.small }\n",
        );
        assert!(parse(&text).is_err());
    }

    #[test]
    fn test_database_requires_secrets_without_url() {
        let text = MINIMAL.replace(
            "provider:",
            "  database:\n    servers: [master]\n    adapter: postgresql\n    secrets: { POSTGRES_USER: app }\nprovider:",
        );
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("POSTGRES_PASSWORD"));
    }

    #[test]
    fn test_env_for_service_layers() {
        let text = MINIMAL.replace(
            "provider:",
            "  database:\n    servers: [master]\n    adapter: postgres\n    \
             secrets: { POSTGRES_USER: app, POSTGRES_PASSWORD: pw, POSTGRES_DB: app }\n  \
             env: { SHARED: one, WORKERS: 1 }\n  secrets: { SECRET_KEY_BASE: s3cr3t }\nprovider:",
        );
        let config = parse(&text).unwrap();
        let env = config.env_for_service("web");
        assert_eq!(env["DEPLOY_ENV"], "production");
        assert_eq!(env["DATABASE_URL"], "postgresql://app:pw@db-myapp:5432/app");
        assert_eq!(env["SHARED"], "one");
        assert_eq!(env["SECRET_KEY_BASE"], "s3cr3t");
        // service env wins over shared env
        assert_eq!(env["WORKERS"], "4");
    }

    #[test]
    fn test_with_branch() {
        let config = parse(MINIMAL).unwrap().with_branch("feat-x").unwrap();
        assert_eq!(config.application.name, "myapp-feat-x");
        assert_eq!(
            config.application.app["web"].hostname().as_deref(),
            Some("feat-x-www.example.com")
        );
        assert!(parse(MINIMAL).unwrap().with_branch("Feat_X").is_err());
    }

    #[test]
    fn test_service_port_inferred_from_image() {
        let svc = ServiceConfig {
            servers: vec!["master".into()],
            image: "redis:7-alpine".into(),
            port: None,
            command: None,
            env: BTreeMap::new(),
            mount: BTreeMap::new(),
        };
        assert_eq!(svc.port(), Some(6379));
    }

    #[test]
    fn test_provider_credentials_env_over_inline() {
        let text = MINIMAL.replace(
            "hetzner: { server_type",
            "hetzner: { api_token: inline-token, server_type",
        );
        let config = parse(&text).unwrap();

        temp_env::with_var("HCLOUD_TOKEN", Some("env-token"), || {
            match config.provider_credentials().unwrap() {
                ProviderCredentials::Hetzner { token } => assert_eq!(token, "env-token"),
                other => panic!("unexpected credentials: {:?}", other),
            }
        });
        temp_env::with_var("HCLOUD_TOKEN", None::<&str>, || {
            match config.provider_credentials().unwrap() {
                ProviderCredentials::Hetzner { token } => assert_eq!(token, "inline-token"),
                other => panic!("unexpected credentials: {:?}", other),
            }
        });
    }

    #[test]
    fn test_missing_cloudflare_credential() {
        let config = parse(MINIMAL).unwrap();
        temp_env::with_vars(
            [
                ("CLOUDFLARE_API_TOKEN", None::<&str>),
                ("CLOUDFLARE_ACCOUNT_ID", None::<&str>),
            ],
            || {
                let err = config.cloudflare_credentials().unwrap_err();
                assert!(matches!(err, ConfigError::MissingCredential(ref v) if v == "CLOUDFLARE_API_TOKEN"));
            },
        );
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = ProviderCredentials::Hetzner {
            token: "hcloud-secret".into(),
        };
        assert!(!format!("{:?}", creds).contains("hcloud-secret"));
    }
}
