use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand};
use rand::RngCore;
use serde::Deserialize;
use time::Time;

/// Command line options for the server.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server and the daily image cleanup (default).
    Serve,
    /// Run a single image cleanup sweep and exit.
    Sweep,
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Prefix prepended to public upload URLs, e.g. `https://example.org`.
    /// Empty means URLs are site-relative (`/uploads/...`).
    pub base_url: String,
    /// Base directory for the database and uploaded files.
    pub data_dir: PathBuf,
    /// Maximum upload size in megabytes.
    pub max_upload_mb: u64,
    /// Upper bound for acquiring a pooled connection and for SQLite lock waits.
    pub db_timeout_secs: u64,
    /// HMAC secret for session tokens. Empty until configured or filled in by
    /// [`Config::ensure_jwt_secret`].
    pub jwt_secret: String,
    /// Whether the session cookie carries the `Secure` attribute.
    pub cookie_secure: bool,
    /// UTC time of day the cleanup sweep runs at.
    pub cleanup_at: Time,
    /// Minimum age of a pending image before it is swept.
    pub grace_hours: i64,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("base_url", &self.base_url)
            .field("data_dir", &self.data_dir)
            .field("max_upload_mb", &self.max_upload_mb)
            .field("db_timeout_secs", &self.db_timeout_secs)
            .field("jwt_secret", &"<redacted>")
            .field("cookie_secure", &self.cookie_secure)
            .field("cleanup_at", &self.cleanup_at)
            .field("grace_hours", &self.grace_hours)
            .field("logging_enabled", &self.logging_enabled)
            .finish()
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    storage: FileStorage,
    #[serde(default)]
    auth: FileAuth,
    #[serde(default)]
    cleanup: FileCleanup,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    base_url: String,
}

#[derive(Deserialize, Default)]
struct FileStorage {
    data_dir: Option<PathBuf>,
    max_upload_mb: Option<u64>,
    db_timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
struct FileAuth {
    jwt_secret: Option<String>,
    #[serde(default = "default_cookie_secure")]
    cookie_secure: bool,
}

#[derive(Deserialize)]
struct FileCleanup {
    #[serde(default = "default_run_at")]
    run_at: String,
    #[serde(default = "default_grace_hours")]
    grace_hours: i64,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

fn default_port() -> u16 {
    8089
}

fn default_logging() -> bool {
    true
}

fn default_cookie_secure() -> bool {
    true
}

fn default_run_at() -> String {
    "02:00".into()
}

fn default_grace_hours() -> i64 {
    24
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
            base_url: String::new(),
        }
    }
}

impl Default for FileAuth {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            cookie_secure: default_cookie_secure(),
        }
    }
}

impl Default for FileCleanup {
    fn default() -> Self {
        Self {
            run_at: default_run_at(),
            grace_hours: default_grace_hours(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("SITEPRESS_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/sitepress.toml"));

        let file_cfg: FileConfig = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };

        let mut port = file_cfg.server.port;
        let mut logging = file_cfg.logging.enabled;
        let mut base_url = file_cfg.server.base_url;
        let mut jwt_secret = file_cfg.auth.jwt_secret;

        // environment overrides
        if let Ok(p) = std::env::var("SITEPRESS_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("SITEPRESS_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }
        if let Ok(b) = std::env::var("BASE_URL") {
            base_url = b;
        }
        if let Ok(s) = std::env::var("JWT_SECRET") {
            jwt_secret = Some(s);
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }

        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }

        let base_url = normalize_base_url(&base_url)?;
        let cleanup_at = parse_time_of_day(&file_cfg.cleanup.run_at)?;
        if file_cfg.cleanup.grace_hours < 0 {
            anyhow::bail!("invalid_grace_hours");
        }

        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("0.0.0.0:{}", port)
        };

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .ok()
            .or(file_cfg.storage.data_dir)
            .unwrap_or_else(default_data_dir);
        let max_upload_mb = std::env::var("MAX_UPLOAD_MB")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(file_cfg.storage.max_upload_mb)
            .unwrap_or(10);

        let jwt_secret = jwt_secret.unwrap_or_default();

        Ok(Self {
            bind,
            base_url,
            data_dir,
            max_upload_mb,
            db_timeout_secs: file_cfg.storage.db_timeout_secs.unwrap_or(5),
            jwt_secret,
            cookie_secure: file_cfg.auth.cookie_secure,
            cleanup_at,
            grace_hours: file_cfg.cleanup.grace_hours,
            logging_enabled: logging,
        })
    }

    /// Fill in a random per-process secret when none was configured.
    /// Returns true if one was generated, so the caller can warn once logging
    /// is up.
    pub fn ensure_jwt_secret(&mut self) -> bool {
        if !self.jwt_secret.is_empty() {
            return false;
        }
        self.jwt_secret = random_secret();
        true
    }

    /// Helper to return the upload limit in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("sitepress.db")
    }

    pub fn grace_period(&self) -> time::Duration {
        time::Duration::hours(self.grace_hours)
    }
}

/// Validate a base URL and strip any trailing slash. Empty stays empty.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    let parsed = url::Url::parse(trimmed).context("invalid base_url")?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("invalid base_url scheme");
    }
    Ok(trimmed.to_string())
}

/// Parse `HH:MM` into a time of day.
pub fn parse_time_of_day(raw: &str) -> Result<Time> {
    let (h, m) = raw
        .trim()
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("invalid run_at, expected HH:MM"))?;
    let h: u8 = h.parse().context("invalid run_at hour")?;
    let m: u8 = m.parse().context("invalid run_at minute")?;
    Time::from_hms(h, m, 0).context("invalid run_at")
}

fn random_secret() -> String {
    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    STANDARD.encode(&secret)
}

/// Determine the default data directory.
pub fn default_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".local/share/sitepress");
        p
    } else {
        PathBuf::from("./sitepress_data")
    }
}
