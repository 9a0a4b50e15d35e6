//! Provider configuration with layered loading and environment variable interpolation.
//!
//! Values come from `provider.toml` (if present), then `PROVIDER_`-prefixed
//! environment variables, then the legacy variables older deployments set.

use figment::{
    providers::{Env, Format, Toml},
    value::{Dict, Map, Value},
    Error as FigmentError, Figment, Metadata, Profile, Provider,
};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "provider.toml";

/// Errors that can occur when loading or parsing provider configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(Box<FigmentError>),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<FigmentError> for ConfigError {
    fn from(err: FigmentError) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Top-level provider configuration.
///
/// Built once at startup and shared read-only with every component.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub nomad: NomadConfig,

    #[serde(default)]
    pub consul: ConsulConfig,

    #[serde(default)]
    pub invocation: InvocationConfig,

    #[serde(default)]
    pub secrets: SecretsConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Legacy environment variables that overrode file or `PROVIDER_` values.
    #[serde(skip)]
    pub deprecated_env: Vec<&'static str>,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Time to wait for in-flight requests during shutdown.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

const fn default_bind_address() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080)
}

const fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Nomad API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NomadConfig {
    #[serde(default = "default_nomad_address")]
    pub address: String,

    /// Region functions are scheduled in.
    #[serde(default = "default_region")]
    pub region: String,

    /// ACL token sent as `X-Nomad-Token`.
    #[serde(default)]
    pub token: Option<String>,

    #[serde(
        default = "default_nomad_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub timeout: Duration,

    /// Datacenter used when the agent cannot be asked for its own.
    #[serde(default = "default_datacenter")]
    pub default_datacenter: String,
}

impl Default for NomadConfig {
    fn default() -> Self {
        Self {
            address: default_nomad_address(),
            region: default_region(),
            token: None,
            timeout: default_nomad_timeout(),
            default_datacenter: default_datacenter(),
        }
    }
}

fn default_nomad_address() -> String {
    "http://localhost:4646".to_owned()
}

fn default_region() -> String {
    "global".to_owned()
}

const fn default_nomad_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_datacenter() -> String {
    "dc1".to_owned()
}

/// Consul catalog and DNS fallback settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsulConfig {
    #[serde(default = "default_consul_address")]
    pub address: String,

    /// ACL token sent as `X-Consul-Token`.
    #[serde(default)]
    pub acl_token: Option<String>,

    /// Fall back to `<function>.service.<dns_domain>` when the catalog is empty.
    #[serde(default)]
    pub dns_enabled: bool,

    #[serde(default = "default_dns_domain")]
    pub dns_domain: String,

    /// Port paired with addresses found through DNS.
    #[serde(default = "default_function_port")]
    pub dns_port: u16,

    /// Per-query timeout; must be shorter than the invocation timeout.
    #[serde(
        default = "default_consul_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub timeout: Duration,

    #[serde(
        default = "default_cache_ttl",
        deserialize_with = "deserialize_duration"
    )]
    pub cache_ttl: Duration,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: default_consul_address(),
            acl_token: None,
            dns_enabled: false,
            dns_domain: default_dns_domain(),
            dns_port: default_function_port(),
            timeout: default_consul_timeout(),
            cache_ttl: default_cache_ttl(),
        }
    }
}

fn default_consul_address() -> String {
    "http://localhost:8500".to_owned()
}

fn default_dns_domain() -> String {
    "consul".to_owned()
}

const fn default_function_port() -> u16 {
    8080
}

const fn default_consul_timeout() -> Duration {
    Duration::from_secs(2)
}

const fn default_cache_ttl() -> Duration {
    Duration::from_secs(5)
}

/// Invocation proxy settings.
#[derive(Debug, Clone, Deserialize)]
pub struct InvocationConfig {
    /// Deadline for a proxied call unless the function overrides it.
    #[serde(
        default = "default_invocation_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub timeout: Duration,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            timeout: default_invocation_timeout(),
        }
    }
}

const fn default_invocation_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Defaults applied when a function references secrets.
#[derive(Debug, Clone, Deserialize)]
pub struct SecretsConfig {
    #[serde(default = "default_vault_policy")]
    pub vault_default_policy: String,

    #[serde(default = "default_vault_prefix")]
    pub vault_secret_path_prefix: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            vault_default_policy: default_vault_policy(),
            vault_secret_path_prefix: default_vault_prefix(),
        }
    }
}

fn default_vault_policy() -> String {
    "openfaas".to_owned()
}

fn default_vault_prefix() -> String {
    "secret/openfaas".to_owned()
}

/// Basic authentication for the `/system` routes.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Directory holding `basic-auth-user` and `basic-auth-password`.
    #[serde(default = "default_secret_path")]
    pub secret_path: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret_path: default_secret_path(),
        }
    }
}

fn default_secret_path() -> PathBuf {
    PathBuf::from("/secrets")
}

/// Prometheus endpoint and metric tagging.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_bind_address")]
    pub bind_address: SocketAddr,

    #[serde(default = "default_metrics_path")]
    pub path: String,

    /// Address of this node, attached to every metric as `instance`.
    #[serde(default = "default_node_address")]
    pub node_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_metrics_bind_address(),
            path: default_metrics_path(),
            node_address: default_node_address(),
        }
    }
}

impl MetricsConfig {
    /// Node address in a form usable as a tag value.
    pub fn instance_tag(&self) -> String {
        self.node_address.replace(':', "_")
    }
}

const fn default_true() -> bool {
    true
}

const fn default_metrics_bind_address() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9090)
}

fn default_metrics_path() -> String {
    "/metrics".to_owned()
}

fn default_node_address() -> String {
    "localhost".to_owned()
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Append logs to this file instead of stdout.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            output: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl ProviderConfig {
    /// Loads configuration from `provider.toml`, or from the environment alone
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Self::load_from(path)
        } else {
            Self::finish(Figment::new().merge(provider_env()))
        }
    }

    /// Loads configuration from the specified file path.
    ///
    /// Environment variables prefixed with `PROVIDER_` override file settings.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let figment = Figment::new()
            .merge(InterpolatingToml::file(path)?)
            .merge(provider_env());

        Self::finish(figment)
    }

    /// Parses configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config = Figment::new()
            .merge(InterpolatingToml::string(content))
            .extract::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        let mut config = figment.extract::<Self>()?;
        config.apply_legacy_env(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
        config.validate()?;
        Ok(config)
    }

    /// Applies the environment variables earlier releases were configured with.
    pub fn apply_legacy_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("NOMAD_ADDR_http") {
            self.metrics.node_address = value;
            self.deprecated_env.push("NOMAD_ADDR_http");
        }
        if let Some(value) = lookup("NOMAD_ADDR") {
            self.nomad.address = value;
            self.deprecated_env.push("NOMAD_ADDR");
        }
        if let Some(value) = lookup("CONSUL_ADDR") {
            self.consul.address = value;
            self.deprecated_env.push("CONSUL_ADDR");
        }
        if let Some(value) = lookup("NOMAD_REGION") {
            self.nomad.region = value;
            self.deprecated_env.push("NOMAD_REGION");
        }
        if let Some(value) = lookup("logger_level") {
            self.logging.level = value.to_lowercase();
            self.deprecated_env.push("logger_level");
        }
        if let Some(value) = lookup("logger_format") {
            self.logging.format = if value.eq_ignore_ascii_case("json") {
                LogFormat::Json
            } else {
                LogFormat::Text
            };
            self.deprecated_env.push("logger_format");
        }
        if let Some(value) = lookup("logger_output") {
            self.logging.output = Some(PathBuf::from(value));
            self.deprecated_env.push("logger_output");
        }
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.invocation.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "invocation.timeout must be greater than zero".into(),
            ));
        }

        if self.consul.timeout >= self.invocation.timeout {
            return Err(ConfigError::Invalid(format!(
                "consul.timeout ({:?}) must be shorter than invocation.timeout ({:?})",
                self.consul.timeout, self.invocation.timeout
            )));
        }

        Ok(())
    }
}

fn provider_env() -> Env {
    Env::prefixed("PROVIDER_").split("__")
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Parses `100ms`, `30s`, `5m` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, millis_per_unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else {
        (s, 1_000)
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("Invalid duration: {s}"))?;

    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("Duration out of range: {s}"))
}

struct EnvVarInterpolator;

impl EnvVarInterpolator {
    fn interpolate_value(value: Value) -> Value {
        match value {
            Value::String(_, s) => Value::from(Self::interpolate_string(&s)),
            Value::Dict(tag, dict) => Value::Dict(
                tag,
                dict.into_iter()
                    .map(|(k, v)| (k, Self::interpolate_value(v)))
                    .collect(),
            ),
            Value::Array(tag, arr) => Value::Array(
                tag,
                arr.into_iter().map(Self::interpolate_value).collect(),
            ),
            other => other,
        }
    }

    /// Replaces `${VAR}` with the variable's value; unset variables become empty.
    fn interpolate_string(s: &str) -> String {
        let mut result = String::with_capacity(s.len());
        let mut rest = s;

        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    if let Ok(val) = std::env::var(&after[..end]) {
                        result.push_str(&val);
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    rest = "";
                }
            }
        }

        result.push_str(rest);
        result
    }
}

/// TOML configuration provider with `${VAR_NAME}` interpolation.
pub struct InterpolatingToml {
    content: String,
}

impl InterpolatingToml {
    pub fn file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|_| ConfigError::FileNotFound(path.as_ref().display().to_string()))?;
        Ok(Self { content })
    }

    pub fn string(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl Provider for InterpolatingToml {
    fn metadata(&self) -> Metadata {
        Metadata::named("Interpolating TOML")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, FigmentError> {
        let base_data = Toml::string(&self.content).data()?;

        Ok(base_data
            .into_iter()
            .map(|(profile, dict)| {
                let dict = dict
                    .into_iter()
                    .map(|(k, v)| (k, EnvVarInterpolator::interpolate_value(v)))
                    .collect();
                (profile, dict)
            })
            .collect())
    }
}
