//! Locating the user DN and verifying passwords.

use super::connection::{Directory, NO_ATTRIBUTES};
use super::error::AuthError;
use super::sanitize::{self, PLACEHOLDER};
use super::settings::Settings;
use super::{Credentials, Strategy};

/// Determine the DN of `username` with the given strategy.
pub(super) async fn user_dn<D: Directory>(
    session: &mut D,
    settings: &Settings,
    strategy: &Strategy,
    username: &str,
) -> Result<String, AuthError> {
    match strategy {
        Strategy::DirectBind { dn_template } => {
            tracing::trace!(template = dn_template, "binding directly via user DN template");
            if !dn_template.contains(PLACEHOLDER) {
                tracing::error!(template = dn_template, "user DN template has no placeholder");
                return Err(AuthError::ResolveNotFound);
            }
            sanitize::dn(dn_template, username)
        },
        Strategy::SearchBind { credentials } => {
            search_user(session, settings, credentials.as_ref(), username).await
        },
    }
}

async fn search_user<D: Directory>(
    session: &mut D,
    settings: &Settings,
    credentials: Option<&Credentials>,
    username: &str,
) -> Result<String, AuthError> {
    if let Some(credentials) = credentials {
        let bind_dn = if credentials.dn.contains(PLACEHOLDER) {
            sanitize::dn(&credentials.dn, username)?
        } else {
            credentials.dn.clone()
        };
        session
            .bind(&bind_dn, &credentials.password)
            .await
            .map_err(|source| {
                tracing::trace!(bind_dn, error = %source, "service bind failed");
                AuthError::BindFailed {
                    dn: bind_dn.clone(),
                    source,
                }
            })?;
        tracing::trace!(bind_dn, "bound as service account");
    } else {
        tracing::trace!("proceeding with anonymous search");
    }

    let filter = sanitize::filter(&settings.filter, username)?;
    tracing::trace!(filter, base = settings.user_base, "searching user DN");

    let entries = session
        .search(&settings.user_base, &filter, &[NO_ATTRIBUTES])
        .await
        .map_err(|source| AuthError::SearchFailed {
            base: settings.user_base.clone(),
            source,
        })?;

    match entries.as_slice() {
        [] => Err(AuthError::ResolveNotFound),
        [entry] if entry.dn.is_empty() => {
            tracing::error!(filter, "search was successful, but found no DN");
            Err(AuthError::ResolveNotFound)
        },
        [entry] => Ok(entry.dn.clone()),
        entries => {
            tracing::trace!(filter, count = entries.len(), "filter returned more than one user");
            Err(AuthError::ResolveAmbiguous {
                count: entries.len(),
            })
        },
    }
}

/// Verify `password` by binding as `dn`.
///
/// An empty password is refused before reaching the directory: most servers
/// treat it as an anonymous bind, which succeeds.
pub(super) async fn bind_user<D: Directory>(
    session: &mut D,
    dn: &str,
    password: &str,
) -> Result<(), AuthError> {
    if password.is_empty() {
        return Err(AuthError::EmptyPassword);
    }

    tracing::trace!(dn, "binding as user");
    session.bind(dn, password).await.map_err(|source| {
        tracing::error!(dn, error = %source, "authentication failed");
        AuthError::BindFailed {
            dn: dn.to_owned(),
            source,
        }
    })?;
    tracing::trace!(dn, "bound as user");

    Ok(())
}
