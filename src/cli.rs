//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::auth::ClientIpSource;
use crate::db::Database;
use axum::http::HeaderName;
use clap::Parser;
use tracing::{error, info};

const MIN_JWT_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "Sojourn",
    about = "Email and password accounts with self-renewing token sessions"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "SOJOURN_PORT", default_value = "7291")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "SOJOURN_DATABASE", default_value = "sojourn.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long, env = "SOJOURN_JWT_SECRET_FILE")]
    pub jwt_secret_file: Option<String>,

    /// Disable new user signups
    #[arg(long, env = "SOJOURN_NO_SIGNUP")]
    pub no_signup: bool,

    /// Take the client IP from this header (e.g. x-forwarded-for) instead of the
    /// socket address. Only use behind a reverse proxy that sets it.
    #[arg(long, env = "SOJOURN_IP_HEADER", value_parser = parse_ip_header)]
    pub ip_header: Option<HeaderName>,

    /// Log output format
    #[arg(short, long, env = "SOJOURN_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,
}

fn parse_ip_header(s: &str) -> Result<HeaderName, String> {
    HeaderName::from_bytes(s.trim().to_ascii_lowercase().as_bytes())
        .map_err(|_| format!("Invalid header name: {}", s))
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    db: Database,
    jwt_secret: String,
    no_signup: bool,
    ip_header: Option<HeaderName>,
) -> ServerConfig {
    let ip_source = match ip_header {
        Some(name) => ClientIpSource::Header(name),
        None => ClientIpSource::ConnectInfo,
    };

    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        no_signup,
        ip_source,
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
