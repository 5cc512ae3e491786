//! Matrix homeserver identity callback.
//!
//! Answers `check_credentials` requests of the Synapse REST auth provider.
//! Authentication failures are never errors here: they are answered with
//! `success: false` and no detail.

use std::sync::LazyLock;

use axum::Json;
use axum::extract::State;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::AppState;
use crate::ldap::{Connector, UserEntry};
use crate::router::Valid;

/// `@localpart:server`.
static MATRIX_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@([^:]+):(.+)$").expect("valid Matrix ID pattern"));

/// Local part of a Matrix user ID.
fn localpart(mxid: &str) -> Option<&str> {
    MATRIX_ID
        .captures(mxid)
        .and_then(|captures| captures.get(1))
        .map(|localpart| localpart.as_str())
}

fn validate_mxid(mxid: &str) -> Result<(), ValidationError> {
    if localpart(mxid).is_none() {
        return Err(ValidationError::new("invalid_mxid"));
    }

    Ok(())
}

#[derive(Debug, Validate, Deserialize, Serialize)]
pub struct Body {
    #[validate(nested)]
    pub user: Credentials,
}

#[derive(Debug, Validate, Deserialize, Serialize)]
pub struct Credentials {
    #[validate(custom(
        function = "validate_mxid",
        message = "\"id\" must be a Matrix user ID such as \"@alice:example.com\"."
    ))]
    pub id: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub auth: Auth,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Auth {
    pub success: bool,
    pub mxid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    pub three_pids: Vec<ThreePid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThreePid {
    pub medium: String,
    pub address: String,
}

impl ThreePid {
    fn new(medium: &str, address: &str) -> Self {
        Self {
            medium: medium.to_owned(),
            address: address.to_owned(),
        }
    }
}

impl Auth {
    fn authenticated(mxid: String, user: &UserEntry) -> Self {
        Self {
            success: true,
            mxid,
            profile: Some(Profile {
                display_name: user.common_name.clone(),
                three_pids: vec![
                    ThreePid::new("uid", &user.common_name),
                    ThreePid::new("mail", &user.mail),
                    ThreePid::new("name", &user.first_name),
                ],
            }),
        }
    }
}

/// Handler for `POST /_matrix-internal/identity/v1/check_credentials`.
pub async fn check_credentials<C>(
    State(state): State<AppState<C>>,
    Valid(body): Valid<Body>,
) -> Json<Response>
where
    C: Connector + 'static,
{
    let Credentials { id, password } = body.user;
    // Checked by `validate_mxid`.
    let username = localpart(&id).unwrap_or_default();

    let strategy = state.authenticator.settings().search_bind();
    let auth = match state
        .authenticator
        .authenticate(username, &password, &strategy)
        .await
    {
        Ok(user) => Auth::authenticated(id, &user),
        Err(_) => Auth::default(),
    };

    Json(Response { auth })
}
