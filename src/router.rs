//! HTTP handlers.

pub mod matrix;

use axum::Json;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::ServerError;

/// JSON body checked with [`Validate`] before reaching the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// State over a scripted directory; `settings` are the `ldap` section.
#[cfg(test)]
pub fn state(
    settings: crate::ldap::Settings,
    connector: crate::ldap::testing::MockConnector,
) -> crate::AppState<crate::ldap::testing::MockConnector> {
    let authenticator = crate::ldap::Authenticator::with_parts(
        std::sync::Arc::new(settings),
        connector,
        crate::ldap::TracingObserver,
    );

    crate::AppState {
        authenticator: std::sync::Arc::new(authenticator),
        metrics: None,
    }
}
