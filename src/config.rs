use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// authkeep - keeps a client session alive against the storefront API
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Identity service base URL
    #[arg(
        short = 'u',
        long,
        env = "IDENTITY_BASE_URL",
        default_value = "http://localhost:8000/api"
    )]
    pub identity_url: String,

    /// Path to the session database
    #[arg(short = 's', long, env = "SESSION_DB_FILE")]
    pub session_db: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in and persist the session
    Login,
    /// Revoke and clear the current session
    Logout,
    /// Show the current session state
    Status,
    /// Keep the session renewed until interrupted
    Watch,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub identity_base_url: String,
    pub session_db_file: PathBuf,
    pub log_level: String,
}

impl Config {
    /// Build configuration with priority: CLI > ENV > defaults.
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let session_db_file = args
            .session_db
            .as_deref()
            .map(expand_tilde)
            .or_else(default_session_db)
            .context("could not determine a session database path (set SESSION_DB_FILE)")?;

        Ok(Config {
            identity_base_url: args.identity_url.clone(),
            session_db_file,
            log_level: args.log_level.clone(),
        })
    }
}

fn default_session_db() -> Option<PathBuf> {
    Some(dirs::data_dir()?.join("authkeep").join("session.sqlite3"))
}

/// Expand tilde (~) in file paths to the user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
