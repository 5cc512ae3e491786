//! Directory sessions.
//!
//! [`Connector`] opens one [`Directory`] session per authentication call.
//! [`LdapConnector`] speaks LDAP through [`ldap3`].

use std::future::Future;
use std::time::Duration;

use ldap3::{
    DerefAliases, Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope,
    SearchEntry, SearchOptions,
};

use super::settings::{SecurityProtocol, Settings};

/// Attribute list asking the server for no attribute at all (RFC 4511).
pub const NO_ATTRIBUTES: &str = "1.1";

/// A live directory session, owned by a single authentication call.
pub trait Directory: Send {
    /// Simple bind as `dn`.
    fn bind(
        &mut self,
        dn: &str,
        password: &str,
    ) -> impl Future<Output = Result<(), LdapError>> + Send;

    /// Subtree search under `base`, never dereferencing aliases.
    fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> impl Future<Output = Result<Vec<SearchEntry>, LdapError>> + Send;

    /// Release the session.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Opens [`Directory`] sessions.
pub trait Connector: Send + Sync {
    type Session: Directory;

    fn connect(
        &self,
        settings: &Settings,
    ) -> impl Future<Output = Result<Self::Session, LdapError>> + Send;
}

/// [`Connector`] backed by a real LDAP server.
#[derive(Debug, Default, Clone, Copy)]
pub struct LdapConnector;

/// Session opened by [`LdapConnector`].
#[derive(Debug)]
pub struct LdapSession {
    conn: Ldap,
    timeout: Duration,
}

impl Connector for LdapConnector {
    type Session = LdapSession;

    async fn connect(&self, settings: &Settings) -> Result<LdapSession, LdapError> {
        let url = settings.url().map_err(|err| LdapError::Io {
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, err),
        })?;

        tracing::trace!(
            %url,
            protocol = ?settings.security_protocol,
            skip_verify = settings.skip_verify,
            "dialing directory"
        );

        let conn_settings = LdapConnSettings::new()
            .set_conn_timeout(settings.timeout())
            .set_starttls(settings.security_protocol == SecurityProtocol::StartTls)
            .set_no_tls_verify(settings.skip_verify);

        let (handle, conn) =
            LdapConnAsync::with_settings(conn_settings, url.as_str()).await?;
        ldap3::drive!(handle);

        Ok(LdapSession {
            conn,
            timeout: settings.timeout(),
        })
    }
}

impl Directory for LdapSession {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), LdapError> {
        self.conn
            .with_timeout(self.timeout)
            .simple_bind(dn, password)
            .await?
            .success()?;
        Ok(())
    }

    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<SearchEntry>, LdapError> {
        let (entries, _) = self
            .conn
            .with_timeout(self.timeout)
            .with_search_options(SearchOptions::new().deref(DerefAliases::Never))
            .search(base, Scope::Subtree, filter, attrs.to_vec())
            .await?
            .success()?;

        Ok(entries
            .into_iter()
            .filter(|entry| !entry.is_ref() && !entry.is_intermediate())
            .map(SearchEntry::construct)
            .collect())
    }

    async fn close(mut self) {
        if let Err(err) = self.conn.unbind().await {
            tracing::debug!(error = %err, "unbind failed, dropping connection");
        }
    }
}
