//! Directory settings consumed by the authentication core.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::Strategy;
use super::sanitize::PLACEHOLDER;

/// `user_uid` value meaning "group members are listed by full DN".
pub const DN_SENTINEL: &str = "dn";

const DEFAULT_TIMEOUT: u64 = 10;
const LDAP_PORT: u16 = 389;
const LDAPS_PORT: u16 = 636;

/// Transport security used to reach the directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityProtocol {
    /// Plain LDAP. Credentials travel in clear text.
    #[default]
    Unencrypted,
    /// Implicit TLS, the connection is secured before the first byte.
    Ldaps,
    /// Plain connection upgraded in place before any bind.
    #[serde(alias = "start_tls")]
    StartTls,
}

/// Group membership requirements.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSettings {
    pub enabled: bool,
    /// Group search base.
    pub dn: String,
    /// Filter selecting the allowed groups.
    pub filter: String,
    /// Group attribute listing the members.
    pub member_uid: String,
}

/// LDAP settings, read-only during an authentication call.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Full endpoint, e.g. `ldaps://ldap.example.com`. Wins over `host`.
    pub uri: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub security_protocol: SecurityProtocol,
    /// Accept any certificate. Lab setups only.
    pub skip_verify: bool,
    /// Timeout in seconds for connect, every operation and the whole call.
    pub timeout: Option<u64>,
    /// Service account. May contain the `%s` placeholder.
    pub bind_dn: Option<String>,
    #[serde(skip_serializing)]
    pub bind_password: Option<String>,
    /// Base of the user search.
    pub user_base: String,
    /// DN template used by direct binding.
    pub user_dn: String,
    pub attribute_cn: String,
    pub attribute_username: String,
    pub attribute_name: String,
    pub attribute_surname: String,
    pub attribute_mail: String,
    /// Unique identifier attribute, or [`DN_SENTINEL`].
    pub user_uid: String,
    /// Fetch attributes with the service account, before the user bind.
    pub attributes_in_bind: bool,
    /// User filter template.
    pub filter: String,
    /// Filter marking administrators. May contain the `%s` placeholder.
    pub admin_filter: Option<String>,
    pub group: Option<GroupSettings>,
}

/// Invalid [`Settings`].
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SettingsError {
    #[error("either `uri` or `host` must be set")]
    MissingEndpoint,
    #[error("invalid `uri`: {0}")]
    Uri(#[from] url::ParseError),
    #[error("`uri` scheme does not match `security_protocol`")]
    SchemeMismatch,
    #[error("`{0}` must contain the `%s` placeholder")]
    MissingPlaceholder(&'static str),
    #[error("`group.{0}` must be set when group checking is enabled")]
    IncompleteGroup(&'static str),
}

impl Settings {
    /// Endpoint URL, built from `uri` or from `host` and `port`.
    pub fn url(&self) -> Result<Url, SettingsError> {
        if let Some(uri) = self.uri.as_deref().filter(|u| !u.is_empty()) {
            let url = Url::parse(uri)?;
            let expected = match self.security_protocol {
                SecurityProtocol::Ldaps => "ldaps",
                SecurityProtocol::Unencrypted | SecurityProtocol::StartTls => "ldap",
            };
            if url.scheme() != expected {
                return Err(SettingsError::SchemeMismatch);
            }
            return Ok(url);
        }

        let host = self
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or(SettingsError::MissingEndpoint)?;
        let (scheme, default_port) = match self.security_protocol {
            SecurityProtocol::Ldaps => ("ldaps", LDAPS_PORT),
            _ => ("ldap", LDAP_PORT),
        };

        Ok(Url::parse(&format!(
            "{scheme}://{host}:{}",
            self.port.unwrap_or(default_port)
        ))?)
    }

    /// Timeout applied to each directory round-trip and to the whole call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
    }

    /// Group block, only when group checking is enabled.
    pub fn group(&self) -> Option<&GroupSettings> {
        self.group.as_ref().filter(|g| g.enabled)
    }

    /// Admin filter, only when one is configured.
    pub fn admin_filter(&self) -> Option<&str> {
        self.admin_filter.as_deref().filter(|f| !f.is_empty())
    }

    /// Whether group members are listed by full DN.
    pub fn members_by_dn(&self) -> bool {
        self.user_uid == DN_SENTINEL
    }

    /// Resolve users by templating [`Settings::user_dn`].
    pub fn direct_bind(&self) -> Strategy {
        Strategy::DirectBind {
            dn_template: self.user_dn.clone(),
        }
    }

    /// Resolve users by searching [`Settings::user_base`], with the service
    /// account when both its DN and password are set.
    pub fn search_bind(&self) -> Strategy {
        let credentials = match (&self.bind_dn, &self.bind_password) {
            (Some(dn), Some(password)) if !dn.is_empty() && !password.is_empty() => {
                Some(super::Credentials {
                    dn: dn.clone(),
                    password: password.clone(),
                })
            },
            _ => None,
        };

        Strategy::SearchBind { credentials }
    }

    /// Check the settings allow [`Settings::direct_bind`].
    pub fn validate_direct_bind(&self) -> Result<(), SettingsError> {
        if !self.user_dn.contains(PLACEHOLDER) {
            return Err(SettingsError::MissingPlaceholder("user_dn"));
        }
        Ok(())
    }

    /// Check the settings are usable.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.url()?;

        if !self.filter.contains(PLACEHOLDER) {
            return Err(SettingsError::MissingPlaceholder("filter"));
        }
        if !self.user_dn.is_empty() && !self.user_dn.contains(PLACEHOLDER) {
            return Err(SettingsError::MissingPlaceholder("user_dn"));
        }

        if let Some(group) = self.group() {
            if group.dn.is_empty() {
                return Err(SettingsError::IncompleteGroup("dn"));
            }
            if group.filter.is_empty() {
                return Err(SettingsError::IncompleteGroup("filter"));
            }
            if group.member_uid.is_empty() {
                return Err(SettingsError::IncompleteGroup("member_uid"));
            }
        }

        if self.skip_verify && self.security_protocol != SecurityProtocol::Unencrypted {
            tracing::warn!(
                "`skip_verify` is enabled: directory certificates are NOT verified"
            );
        }

        Ok(())
    }
}
