//! Chromium driver over the DevTools protocol.
//!
//! Every scenario gets its own browser process with a throwaway profile, and
//! each [`BrowserContext`] maps onto a CDP browser context so cookies and
//! storage never leak between runs.
//!
//! Element references are `data-lookout-ref` attributes stamped onto matched
//! nodes by the query script. A reference whose attribute can no longer be
//! found in the document is reported as [`PageError::Stale`].

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::page::{Page as CdpPage, ScreenshotParams};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{BrowserConfig, Viewport};
use crate::result::{LookoutError, LookoutResult};
use crate::selector::SelectorRule;
use crate::session::{
    BrowserContext, BrowserSession, ElementRef, Launcher, NetworkActivity, Page, PageError,
    PageResult,
};

const REF_ATTR: &str = "data-lookout-ref";

/// Resolves one rule inside an optional scope and stamps every match with a
/// reference attribute. Returns `null` when the scope is gone.
const QUERY_JS: &str = r#"
(rule, scopeRef, prefix) => {
  const ATTR = 'data-lookout-ref';
  let root = document;
  if (scopeRef) {
    root = document.querySelector(`[${ATTR}="${scopeRef}"]`);
    if (!root) return null;
  }
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
  const lower = (s) => norm(s).toLowerCase();
  const SKIP = new Set(['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE', 'HEAD', 'TITLE', 'META', 'LINK']);
  const implicitRole = (el) => {
    const tag = el.tagName.toLowerCase();
    const type = (el.getAttribute('type') || '').toLowerCase();
    if (tag === 'button') return 'button';
    if (tag === 'a' && el.hasAttribute('href')) return 'link';
    if (/^h[1-6]$/.test(tag)) return 'heading';
    if (tag === 'input') {
      if (['button', 'submit', 'reset', 'image'].includes(type)) return 'button';
      if (type === 'checkbox') return 'checkbox';
      if (type === 'radio') return 'radio';
      if (type === 'file' || type === 'hidden') return null;
      return 'textbox';
    }
    const fixed = {
      textarea: 'textbox', select: 'combobox', img: 'img', dialog: 'dialog', nav: 'navigation',
      main: 'main', header: 'banner', footer: 'contentinfo', ul: 'list', ol: 'list',
      li: 'listitem', table: 'table', form: 'form', option: 'option',
    };
    return fixed[tag] || null;
  };
  const roleOf = (el) => el.getAttribute('role') || implicitRole(el);
  const nameOf = (el) => {
    const label = el.getAttribute('aria-label');
    if (label) return norm(label);
    const by = el.getAttribute('aria-labelledby');
    if (by) {
      return norm(by.split(/\s+/).map((id) => {
        const ref = document.getElementById(id);
        return ref ? ref.textContent : '';
      }).join(' '));
    }
    if (el.labels && el.labels.length) return norm(el.labels[0].textContent);
    if (el.tagName === 'IMG') return norm(el.getAttribute('alt'));
    const text = norm(el.textContent);
    if (text) return text;
    return norm(el.getAttribute('title') || el.getAttribute('placeholder') || el.value);
  };
  const all = Array.from(root.querySelectorAll('*')).filter((el) => !SKIP.has(el.tagName));
  const innermost = (test) => all.filter((el) =>
    test(norm(el.textContent)) &&
    !Array.from(el.children).some((c) => !SKIP.has(c.tagName) && test(norm(c.textContent))));
  let found = [];
  switch (rule.by) {
    case 'role':
      found = all.filter((el) => {
        if (roleOf(el) !== rule.role) return false;
        if (rule.name === undefined || rule.name === null) return true;
        const name = nameOf(el);
        return rule.exact ? name === norm(rule.name) : name.toLowerCase().includes(lower(rule.name));
      });
      break;
    case 'exact_text': {
      const want = norm(rule.text);
      found = want ? innermost((t) => t === want) : [];
      break;
    }
    case 'loose_text': {
      const want = lower(rule.text);
      found = want ? innermost((t) => t.toLowerCase().includes(want)) : [];
      break;
    }
    case 'element_id':
      found = all.filter((el) => el.id === rule.id);
      break;
    case 'css':
      found = Array.from(root.querySelectorAll(rule.css));
      break;
    case 'css_text': {
      const want = lower(rule.text);
      found = Array.from(root.querySelectorAll(rule.css))
        .filter((el) => lower(el.textContent).includes(want));
      break;
    }
  }
  return found.map((el, i) => {
    if (!el.hasAttribute(ATTR)) el.setAttribute(ATTR, `${prefix}-${i}`);
    return el.getAttribute(ATTR);
  });
}
"#;

/// Facts about one referenced element, `null` when it is gone
const INSPECT_JS: &str = r#"
(ref) => {
  const el = document.querySelector(`[data-lookout-ref="${ref}"]`);
  if (!el) return null;
  const style = getComputedStyle(el);
  const rect = el.getBoundingClientRect();
  const visible = style.visibility !== 'hidden' && style.display !== 'none' &&
    rect.width > 0 && rect.height > 0;
  const tag = el.tagName.toLowerCase();
  const type = (el.getAttribute('type') || '').toLowerCase();
  return {
    visible,
    disabled: !!el.disabled || el.getAttribute('aria-disabled') === 'true',
    file_input: tag === 'input' && type === 'file',
    text: (el.innerText || el.textContent || '').replace(/\s+/g, ' ').trim(),
    role: el.getAttribute('role'),
    tag,
    input_type: type,
  };
}
"#;

const ACTIVITY_JS: &str = r"
(() => ({
  ready: document.readyState,
  resources: performance.getEntriesByType('resource').length,
}))()
";

const LOAD_STATUS_JS: &str = r"
(() => {
  const nav = performance.getEntriesByType('navigation')[0];
  return {
    status: nav && nav.responseStatus ? nav.responseStatus : 0,
    empty: !document.body || document.body.childElementCount === 0,
  };
})()
";

#[derive(Debug, Deserialize)]
struct Inspection {
    visible: bool,
    disabled: bool,
    file_input: bool,
    text: String,
    role: Option<String>,
    tag: String,
    input_type: String,
}

impl Inspection {
    fn implicit_role(&self) -> Option<&'static str> {
        match self.tag.as_str() {
            "button" => Some("button"),
            "a" => Some("link"),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Some("heading"),
            "dialog" => Some("dialog"),
            "textarea" => Some("textbox"),
            "select" => Some("combobox"),
            "img" => Some("img"),
            "input" => match self.input_type.as_str() {
                "button" | "submit" | "reset" | "image" => Some("button"),
                "checkbox" => Some("checkbox"),
                "radio" => Some("radio"),
                "file" | "hidden" => None,
                _ => Some("textbox"),
            },
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Activity {
    ready: String,
    resources: usize,
}

#[derive(Debug, Deserialize)]
struct LoadStatus {
    status: u16,
    empty: bool,
}

fn protocol(e: impl std::fmt::Display) -> PageError {
    PageError::Protocol(e.to_string())
}

fn selector_for(element: &ElementRef) -> String {
    format!("[{REF_ATTR}=\"{}\"]", element.id())
}

// =============================================================================
// LAUNCHER AND SESSION
// =============================================================================

/// Launches a local Chromium per session
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumLauncher;

impl ChromiumLauncher {
    /// Create a launcher
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Launcher for ChromiumLauncher {
    async fn launch(&self, config: &BrowserConfig) -> LookoutResult<Box<dyn BrowserSession>> {
        let profile = tempfile::Builder::new().prefix("lookout-profile-").tempdir()?;
        let mut builder = CdpConfig::builder()
            .user_data_dir(profile.path())
            .window_size(config.viewport.width, config.viewport.height);
        if !config.headless {
            builder = builder.with_head();
        }
        if !config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = config.chromium_path {
            if !path.exists() {
                return Err(LookoutError::BrowserNotFound);
            }
            builder = builder.chrome_executable(path);
        }
        let cdp_config = builder.build().map_err(|message| {
            tracing::debug!(%message, "chromium configuration rejected");
            LookoutError::BrowserNotFound
        })?;

        let (browser, mut handler) =
            Browser::launch(cdp_config)
                .await
                .map_err(|e| LookoutError::BrowserLaunch {
                    message: e.to_string(),
                })?;
        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "cdp handler error");
                }
            }
        });
        tracing::info!(headless = config.headless, "chromium launched");

        Ok(Box::new(ChromiumSession {
            browser: Arc::new(Mutex::new(browser)),
            handle,
            user_agent: config.user_agent.clone(),
            _profile: profile,
        }))
    }
}

/// A running Chromium process
#[derive(Debug)]
pub struct ChromiumSession {
    browser: Arc<Mutex<Browser>>,
    handle: JoinHandle<()>,
    user_agent: Option<String>,
    _profile: tempfile::TempDir,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn new_context(&mut self, viewport: Viewport) -> PageResult<Box<dyn BrowserContext>> {
        let browser = self.browser.lock().await;
        let created = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(protocol)?;
        Ok(Box::new(ChromiumContext {
            browser: Arc::clone(&self.browser),
            id: created.result.browser_context_id.clone(),
            viewport,
            user_agent: self.user_agent.clone(),
        }))
    }

    async fn close(&mut self) -> PageResult<()> {
        let mut browser = self.browser.lock().await;
        let closed = browser.close().await.map_err(protocol);
        log_exit(browser.wait().await);
        self.handle.abort();
        closed.map(|_| ())
    }
}

/// Record how the Chromium process ended; shutdown proceeds regardless
fn log_exit(waited: std::io::Result<Option<std::process::ExitStatus>>) -> bool {
    match waited {
        Ok(Some(status)) if !status.success() => {
            tracing::debug!(%status, "chromium exited with failure status");
            false
        }
        Ok(_) => true,
        Err(e) => {
            tracing::debug!(error = %e, "chromium exit wait failed");
            false
        }
    }
}

/// Isolated CDP browser context
#[derive(Debug)]
pub struct ChromiumContext {
    browser: Arc<Mutex<Browser>>,
    id: BrowserContextId,
    viewport: Viewport,
    user_agent: Option<String>,
}

#[async_trait]
impl BrowserContext for ChromiumContext {
    async fn new_page(&mut self) -> PageResult<Box<dyn Page>> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(self.id.clone())
            .build()
            .map_err(protocol)?;
        let page = self.browser.lock().await.new_page(params).await.map_err(protocol)?;

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(self.viewport.width))
            .height(i64::from(self.viewport.height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(protocol)?;
        page.execute(metrics).await.map_err(protocol)?;
        if let Some(ref agent) = self.user_agent {
            page.execute(SetUserAgentOverrideParams::new(agent.clone()))
                .await
                .map_err(protocol)?;
        }

        Ok(Box::new(ChromiumPage {
            page,
            url: "about:blank".to_string(),
        }))
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }
}

// =============================================================================
// PAGE
// =============================================================================

/// A Chromium tab
#[derive(Debug)]
pub struct ChromiumPage {
    page: CdpPage,
    url: String,
}

impl ChromiumPage {
    async fn eval<T: DeserializeOwned>(&self, script: String) -> PageResult<T> {
        self.page
            .evaluate(script)
            .await
            .map_err(protocol)?
            .into_value()
            .map_err(protocol)
    }

    async fn inspect(&self, element: &ElementRef) -> PageResult<Inspection> {
        let arg = serde_json::to_string(element.id()).map_err(protocol)?;
        let found: Option<Inspection> = self.eval(format!("({INSPECT_JS})({arg})")).await?;
        found.ok_or(PageError::Stale)
    }
}

#[async_trait]
impl Page for ChromiumPage {
    async fn goto(&mut self, url: &str) -> PageResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| PageError::Navigation(format!("{url}: {e}")))?;
        let load: LoadStatus = self.eval(LOAD_STATUS_JS.to_string()).await?;
        if load.status != 0 && !(200..300).contains(&load.status) && load.empty {
            return Err(PageError::Navigation(format!("HTTP {} from {url}", load.status)));
        }
        self.url = url.to_string();
        Ok(())
    }

    async fn query(
        &self,
        rule: &SelectorRule,
        scope: Option<&ElementRef>,
    ) -> PageResult<Vec<ElementRef>> {
        let rule_json = serde_json::to_string(rule).map_err(protocol)?;
        let scope = serde_json::to_string(&scope.map(ElementRef::id)).map_err(protocol)?;
        let prefix = serde_json::to_string(&uuid::Uuid::new_v4().simple().to_string())
            .map_err(protocol)?;
        let refs: Option<Vec<String>> = self
            .eval(format!("({QUERY_JS})({rule_json}, {scope}, {prefix})"))
            .await?;
        let refs = refs.ok_or(PageError::Stale)?;
        tracing::debug!(rule = %rule, matches = refs.len(), "query evaluated");
        Ok(refs.into_iter().map(ElementRef::new).collect())
    }

    async fn click(&self, element: &ElementRef) -> PageResult<()> {
        let facts = self.inspect(element).await?;
        if facts.disabled {
            return Err(PageError::Rejected(format!("{element} is disabled")));
        }
        if !facts.visible {
            return Err(PageError::Rejected(format!("{element} is not visible")));
        }
        let node = self
            .page
            .find_element(selector_for(element))
            .await
            .map_err(|_| PageError::Stale)?;
        node.click()
            .await
            .map_err(|e| PageError::Rejected(e.to_string()))?;
        Ok(())
    }

    async fn set_files(&self, element: &ElementRef, paths: &[PathBuf]) -> PageResult<()> {
        let facts = self.inspect(element).await?;
        if !facts.file_input {
            return Err(PageError::Rejected(format!("{element} is not a file input")));
        }
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let absolute = std::fs::canonicalize(path).map_err(|e| {
                PageError::Rejected(format!("file not found: {}: {e}", path.display()))
            })?;
            files.push(absolute.to_string_lossy().into_owned());
        }
        let node = self
            .page
            .find_element(selector_for(element))
            .await
            .map_err(|_| PageError::Stale)?;
        let params = SetFileInputFilesParams::builder()
            .files(files)
            .backend_node_id(node.backend_node_id)
            .build()
            .map_err(protocol)?;
        self.page.execute(params).await.map_err(protocol)?;
        Ok(())
    }

    async fn is_visible(&self, element: &ElementRef) -> PageResult<bool> {
        Ok(self.inspect(element).await?.visible)
    }

    async fn text_content(&self, element: &ElementRef) -> PageResult<String> {
        Ok(self.inspect(element).await?.text)
    }

    async fn role(&self, element: &ElementRef) -> PageResult<Option<String>> {
        let facts = self.inspect(element).await?;
        Ok(facts
            .role
            .clone()
            .or_else(|| facts.implicit_role().map(str::to_string)))
    }

    async fn network_activity(&self) -> PageResult<NetworkActivity> {
        let activity: Activity = self.eval(ACTIVITY_JS.to_string()).await?;
        Ok(NetworkActivity {
            document_complete: activity.ready == "complete",
            in_flight: None,
            resources_seen: activity.resources,
        })
    }

    async fn screenshot(&self, full_page: bool) -> PageResult<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();
        self.page.screenshot(params).await.map_err(protocol)
    }

    fn current_url(&self) -> String {
        self.url.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_for_reference() {
        let element = ElementRef::new("abc-0");
        assert_eq!(selector_for(&element), "[data-lookout-ref=\"abc-0\"]");
    }

    #[test]
    fn test_implicit_roles() {
        let facts = |tag: &str, input_type: &str| Inspection {
            visible: true,
            disabled: false,
            file_input: false,
            text: String::new(),
            role: None,
            tag: tag.to_string(),
            input_type: input_type.to_string(),
        };
        assert_eq!(facts("button", "").implicit_role(), Some("button"));
        assert_eq!(facts("input", "submit").implicit_role(), Some("button"));
        assert_eq!(facts("input", "file").implicit_role(), None);
        assert_eq!(facts("h1", "").implicit_role(), Some("heading"));
        assert_eq!(facts("div", "").implicit_role(), None);
    }

    #[test]
    fn test_exit_wait_result_is_classified_not_dropped() {
        assert!(log_exit(Ok(None)));
        let err = std::io::Error::other("no child");
        assert!(!log_exit(Err(err)));
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_exit_status_is_reported() {
        use std::os::unix::process::ExitStatusExt;
        assert!(log_exit(Ok(Some(std::process::ExitStatus::from_raw(0)))));
        assert!(!log_exit(Ok(Some(std::process::ExitStatus::from_raw(1 << 8)))));
    }

    #[tokio::test]
    async fn test_missing_executable_is_not_found() {
        let config = BrowserConfig::default().with_chromium_path("/nonexistent/chromium");
        let err = ChromiumLauncher::new().launch(&config).await.err().unwrap();
        assert!(matches!(err, LookoutError::BrowserNotFound));
    }
}
