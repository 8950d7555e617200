//! Harness configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! environment variables. The CLI applies its flags last.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::result::{LookoutError, LookoutResult};
use crate::selector::MultiMatchPolicy;

/// Default base URL of the application under test
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Default directory for screenshots
pub const DEFAULT_ARTIFACT_DIR: &str = "verification";

/// Default polling interval for assertions and presence waits (100ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Browser viewport size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in CSS pixels
    pub width: u32,
    /// Height in CSS pixels
    pub height: u32,
}

impl Viewport {
    /// Create a viewport
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

/// Browser launch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run in headless mode
    pub headless: bool,
    /// Default viewport for new pages
    pub viewport: Viewport,
    /// Path to chromium binary (None = auto-detect)
    pub chromium_path: Option<PathBuf>,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
    /// User agent override
    pub user_agent: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
            chromium_path: None,
            sandbox: true,
            user_agent: None,
        }
    }
}

impl BrowserConfig {
    /// Set viewport dimensions
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Viewport::new(width, height);
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set chromium path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }
}

/// Default bounds for waits and actions, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Page navigation
    pub navigation_ms: u64,
    /// Presence waits and assertions
    pub presence_ms: u64,
    /// Advisory network-quiescence waits
    pub quiescence_ms: u64,
    /// Single action dispatch
    pub action_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation_ms: 30_000,
            presence_ms: 5_000,
            quiescence_ms: 5_000,
            action_ms: 5_000,
        }
    }
}

impl Timeouts {
    /// Navigation timeout as Duration
    #[must_use]
    pub const fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    /// Action timeout as Duration
    #[must_use]
    pub const fn action(&self) -> Duration {
        Duration::from_millis(self.action_ms)
    }
}

/// Top-level harness configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Base URL that relative navigation targets are joined onto
    pub base_url: String,
    /// Directory screenshots are written to
    pub artifact_dir: PathBuf,
    /// Browser launch settings
    pub browser: BrowserConfig,
    /// Default bounds
    pub timeouts: Timeouts,
    /// Default multi-match policy for locate steps that do not set one
    pub multi_match: MultiMatchPolicy,
    /// Poll interval for presence waits and assertions
    pub poll_interval_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
            browser: BrowserConfig::default(),
            timeouts: Timeouts::default(),
            multi_match: MultiMatchPolicy::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl HarnessConfig {
    /// Create new default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> LookoutResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml_ng::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then `path` if it exists, then the environment
    ///
    /// # Errors
    ///
    /// Returns error if an existing file is invalid or an env value is malformed
    pub fn load(path: Option<&Path>) -> LookoutResult<Self> {
        let config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            _ => Self::default(),
        };
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `LOOKOUT_*` / `CHROMIUM_PATH` overrides read through `lookup`
    ///
    /// # Errors
    ///
    /// Returns error if a boolean variable is not a recognised value
    pub fn with_env_overrides<F>(mut self, lookup: F) -> LookoutResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("LOOKOUT_BASE_URL") {
            self.base_url = url;
        }
        if let Some(dir) = lookup("LOOKOUT_ARTIFACT_DIR") {
            self.artifact_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("CHROMIUM_PATH") {
            self.browser.chromium_path = Some(PathBuf::from(path));
        }
        if let Some(value) = lookup("LOOKOUT_HEADLESS") {
            self.browser.headless = parse_bool(&value).ok_or_else(|| {
                LookoutError::config(format!("LOOKOUT_HEADLESS: expected a boolean, got {value:?}"))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Set base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set artifact directory
    #[must_use]
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    /// Set browser configuration
    #[must_use]
    pub fn with_browser(mut self, browser: BrowserConfig) -> Self {
        self.browser = browser;
        self
    }

    /// Set poll interval in milliseconds
    #[must_use]
    pub const fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Poll interval as Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Join a navigation target onto the base URL.
    ///
    /// Absolute targets (with a scheme) are returned unchanged.
    #[must_use]
    pub fn resolve_url(&self, target: &str) -> String {
        join_url(&self.base_url, target)
    }

    /// Check invariants
    ///
    /// # Errors
    ///
    /// Returns error if a bound is zero or the base URL is empty
    pub fn validate(&self) -> LookoutResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(LookoutError::config("base_url must not be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(LookoutError::config("poll_interval_ms must be positive"));
        }
        let t = &self.timeouts;
        if t.navigation_ms == 0 || t.presence_ms == 0 || t.quiescence_ms == 0 || t.action_ms == 0 {
            return Err(LookoutError::config(
                "timeouts must be positive; unbounded waits are not supported",
            ));
        }
        Ok(())
    }
}

/// Join `target` onto `base` unless it already carries a scheme
#[must_use]
pub fn join_url(base: &str, target: &str) -> String {
    if target.contains("://") || target.starts_with("about:") || target.starts_with("data:") {
        return target.to_string();
    }
    let base = base.trim_end_matches('/');
    if target.is_empty() {
        return base.to_string();
    }
    if target.starts_with('/') {
        format!("{base}{target}")
    } else {
        format!("{base}/{target}")
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
