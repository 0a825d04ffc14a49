use crate::config::{env_bool, env_string, env_u64};
use crate::error::{FailureKind, RunFailure};
use serde_json::Value;
use std::time::Duration;

pub mod chromium;
pub mod scripts;
pub mod session;

const DEFAULT_IDENTITY_STORAGE_KEY: &str = "userId";
const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STATE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MODAL_TIMEOUT_SECS: u64 = 5;
const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_NETWORK_IDLE_MS: u64 = 500;
const DEFAULT_TOGGLE_SETTLE_MS: u64 = 1500;

/// Minimal page automation surface the session controller needs.
#[async_trait::async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and wait for the load event.
    async fn goto(&self, url: &str) -> anyhow::Result<()>;

    async fn reload(&self) -> anyhow::Result<()>;

    /// Evaluate a JS expression and return its value as JSON (`null` for `undefined`).
    async fn evaluate(&self, script: &str) -> anyhow::Result<Value>;

    async fn click(&self, selector: &str) -> anyhow::Result<()>;

    /// Release the browser. Must be safe to call once on every exit path.
    async fn close(&self) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> anyhow::Result<Box<dyn PageDriver>>;
}

/// Which page signal counts as "simulation finished".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessSignal {
    /// `lastFinalState` exists and `#totalAsset` is in the DOM.
    ElementPresent,
    /// `lastFinalState` exists and `#totalAsset` text contains `$`.
    DollarText,
}

impl ReadinessSignal {
    pub fn parse(v: Option<&str>) -> Self {
        match v.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("dollar-text") | Some("dollar_text") => ReadinessSignal::DollarText,
            _ => ReadinessSignal::ElementPresent,
        }
    }

    pub fn script(&self) -> &'static str {
        match self {
            ReadinessSignal::ElementPresent => scripts::STATE_READY_ELEMENT,
            ReadinessSignal::DollarText => scripts::STATE_READY_DOLLAR_TEXT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub target_url: String,
    pub identity_storage_key: String,
    pub navigation_timeout: Duration,
    pub state_timeout: Duration,
    pub modal_timeout: Duration,
    pub poll_interval: Duration,
    pub network_idle: Duration,

    /// Fixed wait after flipping the mode toggle. The page exposes no completion signal for the
    /// recompute it triggers, so this is a heuristic and may need raising if the page slows down.
    pub toggle_settle: Duration,
    pub desired_toggle_checked: bool,
    pub readiness: ReadinessSignal,
}

impl SessionOptions {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            identity_storage_key: DEFAULT_IDENTITY_STORAGE_KEY.to_string(),
            navigation_timeout: Duration::from_secs(DEFAULT_NAVIGATION_TIMEOUT_SECS),
            state_timeout: Duration::from_secs(DEFAULT_STATE_TIMEOUT_SECS),
            modal_timeout: Duration::from_secs(DEFAULT_MODAL_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            network_idle: Duration::from_millis(DEFAULT_NETWORK_IDLE_MS),
            toggle_settle: Duration::from_millis(DEFAULT_TOGGLE_SETTLE_MS),
            desired_toggle_checked: true,
            readiness: ReadinessSignal::ElementPresent,
        }
    }

    /// Timeouts and toggle behaviour from the environment. The URL is checked later by
    /// `validate_target`, so a bad value fails the run without aborting startup.
    pub fn from_env(target_url: Option<&str>) -> Self {
        let mut out = Self::new(target_url.unwrap_or_default().trim());
        if let Some(s) = env_u64("NAVIGATION_TIMEOUT_SECS") {
            out.navigation_timeout = Duration::from_secs(s);
        }
        if let Some(s) = env_u64("STATE_TIMEOUT_SECS") {
            out.state_timeout = Duration::from_secs(s);
        }
        if let Some(s) = env_u64("MODAL_TIMEOUT_SECS") {
            out.modal_timeout = Duration::from_secs(s);
        }
        if let Some(ms) = env_u64("TOGGLE_SETTLE_MS") {
            out.toggle_settle = Duration::from_millis(ms);
        }
        if let Some(b) = env_bool("ORDER_TOGGLE_CHECKED") {
            out.desired_toggle_checked = b;
        }
        out.readiness = ReadinessSignal::parse(env_string("READINESS_SIGNAL").as_deref());
        out
    }

    /// `TARGET_URL` must be an http, https or file URL; anything else is a `Config` failure.
    pub fn validate_target(&self) -> anyhow::Result<()> {
        let invalid = |detail: String| -> anyhow::Error {
            RunFailure::new(FailureKind::Config, "target_url", detail).into()
        };
        if self.target_url.is_empty() {
            return Err(invalid("TARGET_URL is not set".to_string()));
        }
        let url = reqwest::Url::parse(&self.target_url)
            .map_err(|e| invalid(format!("TARGET_URL is not a valid URL ({e}): {}", self.target_url)))?;
        if !matches!(url.scheme(), "http" | "https" | "file") {
            return Err(invalid(format!(
                "TARGET_URL scheme must be http, https or file (got {})",
                url.scheme()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fake;
