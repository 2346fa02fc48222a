use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5003";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SUPPORT_EMAIL: &str = "support@example.edu";

/// Resolved runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base address of the answering service, without trailing slash
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Address used for the `mailto:` escalation link after failures
    pub support_email: String,
    /// Where sessions and the log file live
    pub data_dir: PathBuf,
}

impl Config {
    pub fn new(
        base_url: &str,
        timeout_secs: u64,
        support_email: &str,
        data_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            bail!("Base URL must start with http:// or https:// (got {:?})", base_url);
        }
        if timeout_secs == 0 {
            bail!("Timeout must be at least one second");
        }
        let support_email = support_email.trim().to_string();
        if !support_email.contains('@') {
            bail!("Support email looks invalid: {:?}", support_email);
        }

        let data_dir = match data_dir {
            Some(dir) => dir,
            None => default_data_dir().context("Could not determine a data directory")?,
        };

        Ok(Self {
            base_url,
            timeout: Duration::from_secs(timeout_secs),
            support_email,
            data_dir,
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("chatdesk.log")
    }
}

/// `$CHATDESK_HOME` if set, otherwise the platform data dir
fn default_data_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("CHATDESK_HOME") {
        if !home.is_empty() {
            return Some(PathBuf::from(home));
        }
    }
    dirs::data_dir().map(|d| d.join("chatdesk"))
}
