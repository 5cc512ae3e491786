//! Failure reasons of an authentication call.

use ldap3::LdapError;
use thiserror::Error;

/// Grammar an untrusted value was checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    /// A value embedded into a search filter (RFC 4515).
    Filter,
    /// A value embedded into a distinguished name (RFC 4514).
    Dn,
    /// A whole group filter expression.
    GroupFilter,
    /// A whole group search base.
    GroupDn,
}

impl std::fmt::Display for Grammar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Grammar::Filter => "filter",
            Grammar::Dn => "distinguished name",
            Grammar::GroupFilter => "group filter",
            Grammar::GroupDn => "group distinguished name",
        })
    }
}

/// Every way [`super::Authenticator::authenticate`] can fail.
///
/// All variants are terminal except [`AuthError::AdminCheckFailed`], which
/// the orchestrator swallows after reporting it.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("empty password")]
    EmptyPassword,

    #[error("input contains characters illegal in a {grammar}")]
    SanitizeRejected { grammar: Grammar },

    #[error("directory connection failed: {0}")]
    ConnectFailed(#[source] LdapError),

    #[error("search under '{base}' failed: {source}")]
    SearchFailed {
        base: String,
        #[source]
        source: LdapError,
    },

    #[error("no entry matched the user filter")]
    ResolveNotFound,

    #[error("user filter matched {count} entries")]
    ResolveAmbiguous { count: usize },

    #[error("bind as '{dn}' failed: {source}")]
    BindFailed {
        dn: String,
        #[source]
        source: LdapError,
    },

    #[error("no attributes returned for '{dn}'")]
    AttributeFetchFailed {
        dn: String,
        #[source]
        source: Option<LdapError>,
    },

    #[error("group search failed")]
    GroupSearchFailed(#[source] Option<LdapError>),

    #[error("'{username}' is not a member of any matched group")]
    NotAMember { username: String },

    #[error("admin search failed")]
    AdminCheckFailed(#[source] Option<LdapError>),

    #[error("authentication timed out")]
    TimedOut,
}

impl AuthError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::EmptyPassword => "empty_password",
            AuthError::SanitizeRejected { .. } => "sanitize_rejected",
            AuthError::ConnectFailed(_) => "connect_failed",
            AuthError::SearchFailed { .. } => "search_failed",
            AuthError::ResolveNotFound => "resolve_not_found",
            AuthError::ResolveAmbiguous { .. } => "resolve_ambiguous",
            AuthError::BindFailed { .. } => "bind_failed",
            AuthError::AttributeFetchFailed { .. } => "attribute_fetch_failed",
            AuthError::GroupSearchFailed(_) => "group_search_failed",
            AuthError::NotAMember { .. } => "not_a_member",
            AuthError::AdminCheckFailed(_) => "admin_check_failed",
            AuthError::TimedOut => "timed_out",
        }
    }
}
