//! Startup configuration resolved once from the environment.
//!
//! [`Config::from_env`] reads every `GATEWAY_*` variable, validates it and
//! returns an immutable value. Components receive the sub-struct they need.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GwinitError, Result};
use crate::network::{self, GatewayNetworkConnection};
use crate::version::Version;

pub const ENV_VERSION: &str = "GATEWAY_VERSION";
pub const ENV_INSTALL_DIR: &str = "GATEWAY_INSTALL_DIR";
pub const ENV_DATA_DIR: &str = "GATEWAY_DATA_DIR";
pub const ENV_LOG_DIR: &str = "GATEWAY_LOG_DIR";
pub const ENV_MODULES_DIR: &str = "GATEWAY_MODULES_DIR";
pub const ENV_ADMIN_USERNAME: &str = "GATEWAY_ADMIN_USERNAME";
pub const ENV_ADMIN_PASSWORD: &str = "GATEWAY_ADMIN_PASSWORD";
pub const ENV_ADMIN_PASSWORD_FILE: &str = "GATEWAY_ADMIN_PASSWORD_FILE";
pub const ENV_RANDOM_ADMIN_PASSWORD: &str = "GATEWAY_RANDOM_ADMIN_PASSWORD";
pub const ENV_HTTP_PORT: &str = "GATEWAY_HTTP_PORT";
pub const ENV_HTTPS_PORT: &str = "GATEWAY_HTTPS_PORT";
pub const ENV_USE_SSL: &str = "GATEWAY_USESSL";
pub const ENV_INIT_MEMORY: &str = "GATEWAY_INIT_MEMORY";
pub const ENV_MAX_MEMORY: &str = "GATEWAY_MAX_MEMORY";
pub const ENV_EDITION: &str = "GATEWAY_EDITION";
pub const ENV_SYSTEM_NAME: &str = "GATEWAY_SYSTEM_NAME";
pub const ENV_PUBLIC_ADDRESS: &str = "GATEWAY_PUBLIC_ADDRESS";
pub const ENV_PUBLIC_HTTP_PORT: &str = "GATEWAY_PUBLIC_HTTP_PORT";
pub const ENV_PUBLIC_HTTPS_PORT: &str = "GATEWAY_PUBLIC_HTTPS_PORT";
pub const ENV_MODULE_RELINK: &str = "GATEWAY_MODULE_RELINK";
pub const ENV_AUTOACCEPT_DELAY: &str = "GATEWAY_NETWORK_AUTOACCEPT_DELAY";
pub const ENV_RESTORE_FILE: &str = "GATEWAY_RESTORE_FILE";
pub const ENV_STARTUP_TIMEOUT: &str = "GATEWAY_STARTUP_TIMEOUT";
pub const ENV_TERMINATE_ON_TIMEOUT: &str = "GATEWAY_TERMINATE_ON_TIMEOUT";
pub const ENV_SERVICE_BIN: &str = "GATEWAY_SERVICE_BIN";
pub const ENV_UPGRADE_TOOL: &str = "GATEWAY_UPGRADE_TOOL";
pub const ENV_RESTORE_TOOL: &str = "GATEWAY_RESTORE_TOOL";
pub const ENV_CONFIG_FILE: &str = "GATEWAY_CONFIG_FILE";

const DEFAULT_INSTALL_DIR: &str = "/usr/local/gateway";
const DEFAULT_MODULES_DIR: &str = "/modules";
const DEFAULT_ADMIN_USERNAME: &str = "admin";
const DEFAULT_HTTP_PORT: u16 = 8088;
const DEFAULT_HTTPS_PORT: u16 = 8043;
const DEFAULT_INIT_MEMORY_MB: u32 = 256;
const DEFAULT_MAX_MEMORY_MB: u32 = 1024;
const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 120;

/// Where configuration values come from.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Trimmed, non-empty value of `key`.
pub(crate) fn string_var(env: &dyn EnvSource, key: &str) -> Option<String> {
    env.var(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn parse_bool(env: &dyn EnvSource, key: &str) -> Result<Option<bool>> {
    let Some(raw) = string_var(env, key) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => Err(GwinitError::config(format!(
            "{key}={raw} is not a boolean (true/false/1/0/yes/no)"
        ))),
    }
}

pub(crate) fn parse_number<T: FromStr>(env: &dyn EnvSource, key: &str) -> Result<Option<T>> {
    let Some(raw) = string_var(env, key) else {
        return Ok(None);
    };
    raw.parse()
        .map(Some)
        .map_err(|_| GwinitError::config(format!("{key}={raw} is not a valid number")))
}

/// Path flags given on the command line; each wins over its variable.
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub install_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub modules_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub install_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub modules_dir: PathBuf,
}

impl Paths {
    /// Resolve directories alone, for sub-commands that need no other
    /// configuration.
    pub fn from_env(env: &dyn EnvSource, overrides: &PathOverrides) -> Self {
        let pick = |flag: &Option<PathBuf>, key: &str| {
            flag.clone().or_else(|| string_var(env, key).map(PathBuf::from))
        };
        let install_dir = pick(&overrides.install_dir, ENV_INSTALL_DIR)
            .unwrap_or_else(|| DEFAULT_INSTALL_DIR.into());
        let data_dir =
            pick(&overrides.data_dir, ENV_DATA_DIR).unwrap_or_else(|| install_dir.join("data"));
        let log_dir =
            pick(&overrides.log_dir, ENV_LOG_DIR).unwrap_or_else(|| install_dir.join("logs"));
        let modules_dir = pick(&overrides.modules_dir, ENV_MODULES_DIR)
            .unwrap_or_else(|| DEFAULT_MODULES_DIR.into());
        Self {
            install_dir,
            data_dir,
            log_dir,
            modules_dir,
        }
    }

    pub fn upgrade_marker(&self) -> PathBuf {
        self.data_dir.join(".upgrade-version")
    }

    pub fn commissioned_marker(&self) -> PathBuf {
        self.data_dir.join(".commissioned")
    }

    pub fn init_properties(&self) -> PathBuf {
        self.data_dir.join("init.properties")
    }

    pub fn config_store(&self) -> PathBuf {
        self.data_dir.join("db").join("config.idb")
    }

    pub fn live_modules_dir(&self) -> PathBuf {
        self.install_dir.join("user-lib").join("modules")
    }

    pub fn provisioning_log(&self) -> PathBuf {
        self.log_dir.join("provisioning.log")
    }

    fn pki_dir(&self) -> PathBuf {
        self.data_dir
            .join("gateway-network")
            .join("server")
            .join("security")
            .join("pki")
    }

    pub fn rejected_certs_dir(&self) -> PathBuf {
        self.pki_dir().join("rejected")
    }

    pub fn trusted_certs_dir(&self) -> PathBuf {
        self.pki_dir().join("trusted").join("certs")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    pub init_mb: u32,
    pub max_mb: u32,
}

/// External programs shipped in the install directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub binary: PathBuf,
    pub upgrade_tool: PathBuf,
    pub restore_tool: PathBuf,
    /// File name of the service configuration, relative to the data dir.
    pub config_file: String,
    pub memory: MemoryLimits,
}

#[derive(Clone, PartialEq, Eq)]
pub enum PasswordSource {
    Unset,
    Value(String),
    File(PathBuf),
    Random,
}

impl fmt::Debug for PasswordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("Unset"),
            Self::Value(_) => f.write_str("Value(<redacted>)"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Random => f.write_str("Random"),
        }
    }
}

/// Values sent to the commissioning wizard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub http_port: u16,
    pub https_port: u16,
    pub use_ssl: bool,
    pub admin_username: String,
    pub password: PasswordSource,
    pub edition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicAddress {
    pub address: String,
    pub http_port: Option<u16>,
    pub https_port: Option<u16>,
}

/// Fresh-install inputs beyond the wizard itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningSettings {
    pub restore_archive: Option<PathBuf>,
    pub startup_timeout: Duration,
    pub terminate_on_timeout: bool,
    pub system_name: Option<String>,
    pub public_address: Option<PublicAddress>,
    pub network: Vec<GatewayNetworkConnection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub image_version: Version,
    pub paths: Paths,
    pub service: ServiceSettings,
    pub gateway: GatewaySettings,
    pub provisioning: ProvisioningSettings,
    pub module_relink: bool,
    pub auto_accept_delay: Duration,
}

impl Config {
    pub fn from_env(env: &dyn EnvSource, overrides: &PathOverrides) -> Result<Self> {
        let raw_version = string_var(env, ENV_VERSION)
            .ok_or_else(|| GwinitError::config(format!("{ENV_VERSION} is required")))?;
        let image_version =
            raw_version
                .parse::<Version>()
                .map_err(|_| GwinitError::InvalidVersion {
                    role: "image",
                    value: raw_version.clone(),
                })?;

        let paths = Paths::from_env(env, overrides);
        let service = resolve_service(env, &paths.install_dir)?;
        let gateway = GatewaySettings {
            http_port: parse_number(env, ENV_HTTP_PORT)?.unwrap_or(DEFAULT_HTTP_PORT),
            https_port: parse_number(env, ENV_HTTPS_PORT)?.unwrap_or(DEFAULT_HTTPS_PORT),
            use_ssl: parse_bool(env, ENV_USE_SSL)?.unwrap_or(false),
            admin_username: string_var(env, ENV_ADMIN_USERNAME)
                .unwrap_or_else(|| DEFAULT_ADMIN_USERNAME.to_string()),
            password: resolve_password_source(env)?,
            edition: string_var(env, ENV_EDITION),
        };
        let provisioning = resolve_provisioning(env)?;

        Ok(Self {
            image_version,
            paths,
            service,
            gateway,
            provisioning,
            module_relink: parse_bool(env, ENV_MODULE_RELINK)?.unwrap_or(false),
            auto_accept_delay: Duration::from_secs(
                parse_number(env, ENV_AUTOACCEPT_DELAY)?.unwrap_or(0),
            ),
        })
    }
}

fn resolve_service(env: &dyn EnvSource, install_dir: &Path) -> Result<ServiceSettings> {
    let program = |key: &str, default: &str| {
        install_dir.join(string_var(env, key).unwrap_or_else(|| default.to_string()))
    };

    let init_mb = parse_number(env, ENV_INIT_MEMORY)?.unwrap_or(DEFAULT_INIT_MEMORY_MB);
    let max_mb = parse_number(env, ENV_MAX_MEMORY)?.unwrap_or(DEFAULT_MAX_MEMORY_MB);
    if init_mb > max_mb {
        return Err(GwinitError::config(format!(
            "{ENV_INIT_MEMORY} ({init_mb}) must not exceed {ENV_MAX_MEMORY} ({max_mb})"
        )));
    }

    Ok(ServiceSettings {
        binary: program(ENV_SERVICE_BIN, "gateway"),
        upgrade_tool: program(ENV_UPGRADE_TOOL, "upgrader"),
        restore_tool: program(ENV_RESTORE_TOOL, "gwcmd.sh"),
        config_file: string_var(env, ENV_CONFIG_FILE).unwrap_or_else(|| "gateway.conf".into()),
        memory: MemoryLimits { init_mb, max_mb },
    })
}

fn resolve_password_source(env: &dyn EnvSource) -> Result<PasswordSource> {
    let value = string_var(env, ENV_ADMIN_PASSWORD);
    let file = string_var(env, ENV_ADMIN_PASSWORD_FILE);
    let random = parse_bool(env, ENV_RANDOM_ADMIN_PASSWORD)?.unwrap_or(false);

    let configured = [value.is_some(), file.is_some(), random]
        .into_iter()
        .filter(|set| *set)
        .count();
    if configured > 1 {
        return Err(GwinitError::config(format!(
            "only one of {ENV_ADMIN_PASSWORD}, {ENV_ADMIN_PASSWORD_FILE} and \
             {ENV_RANDOM_ADMIN_PASSWORD} may be set"
        )));
    }

    Ok(match (value, file) {
        (Some(value), _) => PasswordSource::Value(value),
        (None, Some(file)) => PasswordSource::File(file.into()),
        (None, None) if random => PasswordSource::Random,
        (None, None) => PasswordSource::Unset,
    })
}

fn resolve_provisioning(env: &dyn EnvSource) -> Result<ProvisioningSettings> {
    let public_http = parse_number(env, ENV_PUBLIC_HTTP_PORT)?;
    let public_https = parse_number(env, ENV_PUBLIC_HTTPS_PORT)?;
    let public_address = match string_var(env, ENV_PUBLIC_ADDRESS) {
        Some(address) => Some(PublicAddress {
            address,
            http_port: public_http,
            https_port: public_https,
        }),
        None if public_http.is_some() || public_https.is_some() => {
            return Err(GwinitError::config(format!(
                "public ports require {ENV_PUBLIC_ADDRESS}"
            )));
        }
        None => None,
    };

    Ok(ProvisioningSettings {
        restore_archive: string_var(env, ENV_RESTORE_FILE).map(PathBuf::from),
        startup_timeout: Duration::from_secs(
            parse_number(env, ENV_STARTUP_TIMEOUT)?.unwrap_or(DEFAULT_STARTUP_TIMEOUT_SECS),
        ),
        terminate_on_timeout: parse_bool(env, ENV_TERMINATE_ON_TIMEOUT)?.unwrap_or(true),
        system_name: string_var(env, ENV_SYSTEM_NAME),
        public_address,
        network: network::discover(env)?,
    })
}
