use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Process configuration, read once from the environment at startup.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// sqlx SQLite URL, or `memory` for the in-process store.
    pub database_url: String,
    pub jwt_secret: String,
    /// True when `JWT_SECRET_KEY` was unset and a per-process key was generated.
    pub jwt_secret_generated: bool,
    pub token_ttl_minutes: u32,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    /// 0 disables the sweep.
    pub plan_sweep_interval_secs: u64,
    pub billing_webhook_secret: Option<String>,
    pub oauth: OAuthClientIds,
}

/// Public OAuth client ids handed to the front end.
#[derive(Clone, Debug, Default)]
pub struct OAuthClientIds {
    pub google: Option<String>,
    pub github: Option<String>,
    pub linkedin: Option<String>,
}

impl OAuthClientIds {
    pub fn any(&self) -> bool {
        self.google.is_some() || self.github.is_some() || self.linkedin.is_some()
    }
}

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/catalog.db?mode=rwc";

impl ServerConfig {
    pub fn from_env() -> Result<Self, String> {
        let addr = env::var("LAYER_SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| format!("invalid LAYER_SERVER_ADDR {addr:?}: {e}"))?;

        let (jwt_secret, jwt_secret_generated) = match env_var_nonempty("JWT_SECRET_KEY") {
            Some(secret) => (secret, false),
            None => (
                format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()),
                true,
            ),
        };

        Ok(Self {
            addr,
            database_url: env_var_nonempty("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            jwt_secret,
            jwt_secret_generated,
            token_ttl_minutes: env_var_u32("ACCESS_TOKEN_EXPIRE_MINUTES", 30),
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploads")),
            max_upload_bytes: env_var_usize("MAX_UPLOAD_BYTES", 100 * 1024 * 1024),
            plan_sweep_interval_secs: env_var_u64("PLAN_SWEEP_INTERVAL_SECS", 3600),
            billing_webhook_secret: env_var_nonempty("BILLING_WEBHOOK_SECRET"),
            oauth: OAuthClientIds {
                google: env_var_nonempty("GOOGLE_CLIENT_ID"),
                github: env_var_nonempty("GITHUB_CLIENT_ID"),
                linkedin: env_var_nonempty("LINKEDIN_CLIENT_ID"),
            },
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == "memory"
    }
}

/// Directory that must exist before SQLite can create the database file.
pub fn sqlite_parent_dir(url: &str) -> Option<&Path> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next()?;
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
}

fn env_var_nonempty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_var_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
