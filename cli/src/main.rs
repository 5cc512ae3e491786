//! OpenVPN `auth-user-pass-verify` script.
//!
//! Exits with `0` when the directory accepts the credentials, `1` otherwise.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use ldapgate::config::Configuration;
use ldapgate::ldap::Authenticator;
use ldapgate::telemetry;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file.
    #[arg(long, short, default_value = "config.yaml")]
    config: PathBuf,
    /// Bind with the `user_dn` template instead of searching for the user.
    #[arg(long)]
    direct_bind: bool,
    /// Credentials file written by OpenVPN `via-file`: username, then password.
    file: Option<PathBuf>,
    /// Set by OpenVPN `via-env`.
    #[arg(long, env = "username", hide_env_values = true)]
    username: Option<String>,
    /// Set by OpenVPN `via-env`.
    #[arg(long, env = "password", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Debug, PartialEq)]
struct Credentials {
    username: String,
    password: String,
}

/// First two lines of `content`.
fn parse_credentials(content: &str) -> Option<Credentials> {
    let mut lines = content.lines();
    let username = lines.next()?.trim_end_matches('\r');
    let password = lines.next()?.trim_end_matches('\r');

    Some(Credentials {
        username: username.to_owned(),
        password: password.to_owned(),
    })
}

async fn read_credentials(args: &Args) -> Result<Credentials, Box<dyn Error>> {
    if let Some(path) = &args.file {
        return read_credentials_file(path).await;
    }

    match (&args.username, &args.password) {
        (Some(username), Some(password)) => Ok(Credentials {
            username: username.clone(),
            password: password.clone(),
        }),
        _ => Err("missing `username` or `password` environment variable".into()),
    }
}

async fn read_credentials_file(path: &Path) -> Result<Credentials, Box<dyn Error>> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_credentials(&content)
        .ok_or_else(|| format!("`{}` must hold a username and a password", path.display()).into())
}

/// Authenticate the credentials described by `args`; `0` on success.
async fn run(args: &Args) -> ExitCode {
    let config = match Configuration::default().path(args.config.clone()).read() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("cannot load configuration: {error}");
            return ExitCode::FAILURE;
        },
    };

    // Logging is best effort.
    let _guard = telemetry::setup_subscriber(&config.log)
        .map_err(|error| eprintln!("cannot initialize logging: {error}"))
        .ok();

    let strategy = if args.direct_bind {
        if let Err(error) = config.ldap.validate_direct_bind() {
            tracing::error!(%error, "direct bind is not configured");
            return ExitCode::FAILURE;
        }
        config.ldap.direct_bind()
    } else {
        config.ldap.search_bind()
    };

    let credentials = match read_credentials(args).await {
        Ok(credentials) => credentials,
        Err(error) => {
            tracing::error!(%error, "cannot read credentials");
            return ExitCode::FAILURE;
        },
    };

    let authenticator = Authenticator::new(Arc::new(config.ldap.clone()));
    match authenticator
        .authenticate(&credentials.username, &credentials.password, &strategy)
        .await
    {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    run(&Args::parse()).await
}
