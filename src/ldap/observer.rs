//! Observability seam of the authentication core.
//!
//! The orchestrator reports every step to an [`Observer`] it was built with
//! and never configures logging itself.

use super::error::AuthError;

/// A step of an authentication call.
#[derive(Debug)]
pub enum Event<'a> {
    Connected { username: &'a str },
    Resolved { dn: &'a str },
    PasswordVerified { dn: &'a str },
    AttributesFetched { dn: &'a str },
    MembershipVerified { dn: &'a str },
    AdminChecked { dn: &'a str, is_admin: bool },
    /// Recoverable: the call goes on with `is_admin = false`.
    AdminCheckFailed { dn: &'a str, error: &'a AuthError },
    Succeeded { dn: &'a str },
    Failed { username: &'a str, error: &'a AuthError },
}

impl Event<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connected { .. } => "connected",
            Event::Resolved { .. } => "resolved",
            Event::PasswordVerified { .. } => "password_verified",
            Event::AttributesFetched { .. } => "attributes_fetched",
            Event::MembershipVerified { .. } => "membership_verified",
            Event::AdminChecked { .. } => "admin_checked",
            Event::AdminCheckFailed { .. } => "admin_check_failed",
            Event::Succeeded { .. } => "succeeded",
            Event::Failed { .. } => "failed",
        }
    }
}

/// Receives the [`Event`]s of every authentication call.
pub trait Observer: Send + Sync {
    fn observe(&self, event: &Event<'_>);
}

/// Default [`Observer`], forwarding to `tracing` and `metrics`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn observe(&self, event: &Event<'_>) {
        match event {
            Event::AdminCheckFailed { dn, error } => {
                tracing::error!(dn, error = %error, "admin check failed");
            },
            Event::Succeeded { dn } => {
                tracing::info!(dn, "user authenticated");
                metrics::counter!("ldap_authentications_total", "outcome" => "success")
                    .increment(1);
            },
            Event::Failed { username, error } => {
                tracing::warn!(username, kind = error.kind(), error = %error, "authentication failed");
                metrics::counter!("ldap_authentications_total", "outcome" => error.kind())
                    .increment(1);
            },
            event => tracing::trace!(step = event.name(), ?event, "authentication step"),
        }
    }
}
