//! Configuration manager.

use std::fs::File;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ldap::Settings;
use crate::ldap::settings::SettingsError;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_PORT: u16 = 8090;
/// Overrides `ldap.bind_password`, keeping the secret out of the file.
pub const BIND_PASSWORD_ENV: &str = "LDAP_BIND_PASSWORD";

/// Errors that may occur during the configuration loading process.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot open `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to deserialize configuration: {0}")]
    Deserialize(#[from] serde_yaml::Error),
    #[error("invalid `ldap` section: {0}")]
    Ldap(#[from] SettingsError),
    #[error("invalid `server.port`: must be between 1-65535")]
    Port,
    #[error("`log.file` is required when `log.mode` is `file`")]
    LogFile,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub log: Log,
    /// Related to LDAP3 configuration.
    pub ldap: Settings,
    #[serde(skip)]
    path: PathBuf,
}

/// HTTP listener of the REST transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
        }
    }
}

impl Server {
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// Where logs are written.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    #[default]
    Console,
    File,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Log {
    /// `tracing` filter directive, overridden by `RUST_LOG`.
    pub level: String,
    pub mode: LogMode,
    /// Log file, appended to when `mode` is `file`.
    pub file: Option<PathBuf>,
    /// OTLP gRPC endpoint receiving logs and traces.
    pub otlp_endpoint: Option<String>,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: "info".into(),
            mode: LogMode::Console,
            file: None,
            otlp_endpoint: None,
        }
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, Error> {
        let file_path = if self.path.as_os_str().is_empty() {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        } else {
            self.path
        };

        let file = File::open(&file_path).map_err(|source| Error::Io {
            path: file_path.clone(),
            source,
        })?;
        let mut config: Configuration = serde_yaml::from_reader(file)?;
        config.path = file_path;

        if let Ok(password) = std::env::var(BIND_PASSWORD_ENV) {
            config.ldap.bind_password = Some(password);
        }

        config.validate()?;
        Ok(Arc::new(config))
    }

    /// Check every section is usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.server.port == 0 {
            return Err(Error::Port);
        }
        if self.log.mode == LogMode::File && self.log.file.is_none() {
            return Err(Error::LogFile);
        }
        self.ldap.validate()?;

        Ok(())
    }
}
