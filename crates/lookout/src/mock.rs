//! In-memory browser for testing scenarios without Chromium.
//!
//! [`MockApp`] describes a tiny application: routes mapped to documents made
//! of [`MockElement`]s. Elements can appear late, be revealed by clicks,
//! re-render (making old references stale) or refuse interaction, which is
//! enough to exercise every waiting and fallback path of the harness.
//! Timing uses `tokio::time::Instant`, so tests under a paused clock are
//! deterministic.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{BrowserConfig, Viewport};
use crate::result::{LookoutError, LookoutResult};
use crate::selector::{text_matches_exact, text_matches_loose, SelectorRule};
use crate::session::{
    BrowserContext, BrowserSession, ElementRef, Launcher, NetworkActivity, Page, PageError,
    PageResult,
};

/// Bytes every mock screenshot returns
pub const MOCK_PNG: &[u8] = crate::artifact::PNG_1X1;

/// Side effect of interacting with an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Make a hidden element present
    Reveal(String),
    /// Remove an element from the document
    Remove(String),
    /// Replace an element's node, invalidating existing references
    Rerender(String),
    /// Navigate to another route
    Navigate(String),
}

/// A mock DOM element
#[derive(Debug, Clone)]
pub struct MockElement {
    key: String,
    role: Option<String>,
    name: Option<String>,
    text: String,
    id_attr: Option<String>,
    css: Vec<String>,
    parent: Option<String>,
    initially_present: bool,
    visible: bool,
    appears_after: Duration,
    file_input: bool,
    disabled: bool,
    stale_clicks: usize,
    on_click: Vec<Effect>,
    on_files: Vec<Effect>,
}

impl MockElement {
    /// Create an element with a unique key
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            role: None,
            name: None,
            text: String::new(),
            id_attr: None,
            css: Vec::new(),
            parent: None,
            initially_present: true,
            visible: true,
            appears_after: Duration::ZERO,
            file_input: false,
            disabled: false,
            stale_clicks: 0,
            on_click: Vec::new(),
            on_files: Vec::new(),
        }
    }

    /// Shorthand for a button with text and accessible name
    #[must_use]
    pub fn button(key: impl Into<String>, label: impl Into<String>) -> Self {
        let label = label.into();
        Self::new(key).role("button").text(label.clone()).name(label)
    }

    /// Set the ARIA role
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Set the accessible name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the element's own text
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set the `id` attribute
    #[must_use]
    pub fn id_attr(mut self, id: impl Into<String>) -> Self {
        self.id_attr = Some(id.into());
        self
    }

    /// CSS selector this element answers to
    #[must_use]
    pub fn css(mut self, selector: impl Into<String>) -> Self {
        self.css.push(selector.into());
        self
    }

    /// Nest inside another element
    #[must_use]
    pub fn within(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Absent until revealed by an [`Effect::Reveal`]
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.initially_present = false;
        self
    }

    /// Present in the DOM but not rendered
    #[must_use]
    pub const fn invisible(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Appear only after `ms` milliseconds since navigation or reveal
    #[must_use]
    pub const fn appears_after(mut self, ms: u64) -> Self {
        self.appears_after = Duration::from_millis(ms);
        self
    }

    /// Accept `set_files`
    #[must_use]
    pub const fn file_input(mut self) -> Self {
        self.file_input = true;
        self
    }

    /// Reject clicks
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Re-render on each of the next `n` clicks instead of handling them
    #[must_use]
    pub const fn stale_clicks(mut self, n: usize) -> Self {
        self.stale_clicks = n;
        self
    }

    /// Effect triggered by a successful click
    #[must_use]
    pub fn on_click(mut self, effect: Effect) -> Self {
        self.on_click.push(effect);
        self
    }

    /// Effect triggered by setting files
    #[must_use]
    pub fn on_files(mut self, effect: Effect) -> Self {
        self.on_files.push(effect);
        self
    }

    fn matches(&self, rule: &SelectorRule) -> bool {
        match rule {
            SelectorRule::Role { role, name, exact } => {
                if self.role.as_deref() != Some(role.as_str()) {
                    return false;
                }
                let Some(wanted) = name else {
                    return true;
                };
                let accessible = self.name.as_deref().unwrap_or(&self.text);
                if *exact {
                    text_matches_exact(accessible, wanted)
                } else {
                    text_matches_loose(accessible, wanted)
                }
            }
            SelectorRule::ExactText { text } => {
                !self.text.is_empty() && text_matches_exact(&self.text, text)
            }
            SelectorRule::LooseText { text } => {
                !self.text.is_empty() && text_matches_loose(&self.text, text)
            }
            SelectorRule::ElementId { id } => self.id_attr.as_deref() == Some(id.as_str()),
            SelectorRule::Css { css } => self.css.iter().any(|c| c == css),
            SelectorRule::CssText { css, text } => {
                self.css.iter().any(|c| c == css) && text_matches_loose(&self.text, text)
            }
        }
    }
}

/// A mock document served at a route
#[derive(Debug, Clone, Default)]
pub struct MockDocument {
    elements: Vec<MockElement>,
    status: Option<u16>,
    quiescent_after: Option<Duration>,
    never_quiescent: bool,
}

impl MockDocument {
    /// Empty document, status 200, network idle immediately
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element (document order = insertion order)
    #[must_use]
    pub fn element(mut self, element: MockElement) -> Self {
        self.elements.push(element);
        self
    }

    /// HTTP status of the document response
    #[must_use]
    pub const fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Network goes idle `ms` after navigation
    #[must_use]
    pub const fn quiescent_after(mut self, ms: u64) -> Self {
        self.quiescent_after = Some(Duration::from_millis(ms));
        self
    }

    /// Network never goes idle (polling, websockets)
    #[must_use]
    pub const fn never_quiescent(mut self) -> Self {
        self.never_quiescent = true;
        self
    }
}

/// A mock application: routes to documents
#[derive(Debug, Clone, Default)]
pub struct MockApp {
    routes: HashMap<String, MockDocument>,
    fail_screenshots: bool,
    fail_launch: bool,
}

impl MockApp {
    /// Create an application with no routes
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `document` at `path` (e.g. `/equipments`)
    #[must_use]
    pub fn route(mut self, path: impl Into<String>, document: MockDocument) -> Self {
        self.routes.insert(path.into(), document);
        self
    }

    /// Make every screenshot fail
    #[must_use]
    pub const fn failing_screenshots(mut self) -> Self {
        self.fail_screenshots = true;
        self
    }

    /// Make every launch fail
    #[must_use]
    pub const fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }
}

/// Counters shared by every session a [`MockLauncher`] creates
#[derive(Debug, Default)]
pub struct MockStats {
    launches: AtomicUsize,
    closes: AtomicUsize,
    screenshots: AtomicUsize,
    clicks: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl MockStats {
    /// Sessions launched
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Sessions closed
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Screenshots attempted
    pub fn screenshots(&self) -> usize {
        self.screenshots.load(Ordering::SeqCst)
    }

    /// Clicks attempted
    pub fn clicks(&self) -> usize {
        self.clicks.load(Ordering::SeqCst)
    }

    /// Call log (`goto:/path`, `click:key`, `files:key`, ...)
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

/// Launcher producing [`MockApp`]-backed sessions
#[derive(Debug, Clone)]
pub struct MockLauncher {
    app: Arc<MockApp>,
    stats: Arc<MockStats>,
}

impl MockLauncher {
    /// Create a launcher for `app`
    #[must_use]
    pub fn new(app: MockApp) -> Self {
        Self {
            app: Arc::new(app),
            stats: Arc::new(MockStats::default()),
        }
    }

    /// Shared counters
    #[must_use]
    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn launch(&self, _config: &BrowserConfig) -> LookoutResult<Box<dyn BrowserSession>> {
        if self.app.fail_launch {
            return Err(LookoutError::BrowserLaunch {
                message: "mock launch failure".to_string(),
            });
        }
        self.stats.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            app: Arc::clone(&self.app),
            stats: Arc::clone(&self.stats),
            closed: false,
        }))
    }
}

#[derive(Debug)]
struct MockSession {
    app: Arc<MockApp>,
    stats: Arc<MockStats>,
    closed: bool,
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn new_context(&mut self, viewport: Viewport) -> PageResult<Box<dyn BrowserContext>> {
        if self.closed {
            return Err(PageError::Protocol("session closed".to_string()));
        }
        Ok(Box::new(MockContext {
            app: Arc::clone(&self.app),
            stats: Arc::clone(&self.stats),
            viewport,
        }))
    }

    async fn close(&mut self) -> PageResult<()> {
        if !self.closed {
            self.closed = true;
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct MockContext {
    app: Arc<MockApp>,
    stats: Arc<MockStats>,
    viewport: Viewport,
}

#[async_trait]
impl BrowserContext for MockContext {
    async fn new_page(&mut self) -> PageResult<Box<dyn Page>> {
        Ok(Box::new(MockPage {
            app: Arc::clone(&self.app),
            stats: Arc::clone(&self.stats),
            state: Mutex::new(PageState::blank()),
        }))
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }
}

#[derive(Debug)]
struct PageState {
    url: String,
    document: MockDocument,
    loaded_at: Instant,
    /// key -> instant it became present
    present_since: HashMap<String, Instant>,
    removed: HashSet<String>,
    generation: HashMap<String, u32>,
    stale_clicks_left: HashMap<String, usize>,
    files: HashMap<String, Vec<PathBuf>>,
}

impl PageState {
    fn blank() -> Self {
        Self {
            url: "about:blank".to_string(),
            document: MockDocument::new(),
            loaded_at: Instant::now(),
            present_since: HashMap::new(),
            removed: HashSet::new(),
            generation: HashMap::new(),
            stale_clicks_left: HashMap::new(),
            files: HashMap::new(),
        }
    }

    fn load(&mut self, url: &str, document: MockDocument) {
        let now = Instant::now();
        self.url = url.to_string();
        self.present_since = document
            .elements
            .iter()
            .filter(|e| e.initially_present)
            .map(|e| (e.key.clone(), now))
            .collect();
        self.stale_clicks_left = document
            .elements
            .iter()
            .filter(|e| e.stale_clicks > 0)
            .map(|e| (e.key.clone(), e.stale_clicks))
            .collect();
        self.document = document;
        self.loaded_at = now;
        self.removed.clear();
        self.generation.clear();
        self.files.clear();
    }

    fn element(&self, key: &str) -> Option<&MockElement> {
        self.document.elements.iter().find(|e| e.key == key)
    }

    fn is_present(&self, element: &MockElement) -> bool {
        if self.removed.contains(&element.key) {
            return false;
        }
        let Some(since) = self.present_since.get(&element.key) else {
            return false;
        };
        if since.elapsed() < element.appears_after {
            return false;
        }
        match element.parent {
            Some(ref parent) => self.element(parent).is_some_and(|p| self.is_present(p)),
            None => true,
        }
    }

    fn is_descendant(&self, element: &MockElement, ancestor: &str) -> bool {
        let mut current = element.parent.as_deref();
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = self.element(key).and_then(|e| e.parent.as_deref());
        }
        false
    }

    fn reference(&self, key: &str) -> ElementRef {
        let generation = self.generation.get(key).copied().unwrap_or(0);
        ElementRef::new(format!("{key}@{generation}"))
    }

    /// Resolve a reference back to a live element, or report it stale
    fn live(&self, element: &ElementRef) -> PageResult<MockElement> {
        let (key, generation) = element.id().rsplit_once('@').ok_or(PageError::Stale)?;
        let current = self.generation.get(key).copied().unwrap_or(0);
        if generation.parse::<u32>().ok() != Some(current) {
            return Err(PageError::Stale);
        }
        let el = self.element(key).ok_or(PageError::Stale)?;
        if !self.is_present(el) {
            return Err(PageError::Stale);
        }
        Ok(el.clone())
    }

    fn apply(&mut self, app: &MockApp, effects: &[Effect]) -> PageResult<()> {
        for effect in effects {
            match effect {
                Effect::Reveal(key) => {
                    self.removed.remove(key);
                    self.present_since.insert(key.clone(), Instant::now());
                }
                Effect::Remove(key) => {
                    self.removed.insert(key.clone());
                }
                Effect::Rerender(key) => {
                    *self.generation.entry(key.clone()).or_insert(0) += 1;
                }
                Effect::Navigate(path) => {
                    let document = app
                        .routes
                        .get(path)
                        .cloned()
                        .ok_or_else(|| PageError::Navigation(format!("no route for {path}")))?;
                    self.load(path, document);
                }
            }
        }
        Ok(())
    }
}

/// Page over a [`MockApp`]
#[derive(Debug)]
pub struct MockPage {
    app: Arc<MockApp>,
    stats: Arc<MockStats>,
    state: Mutex<PageState>,
}

impl MockPage {
    fn state(&self) -> PageResult<std::sync::MutexGuard<'_, PageState>> {
        self.state
            .lock()
            .map_err(|_| PageError::Protocol("mock page state poisoned".to_string()))
    }

    /// Files set on an element, by element key
    pub fn files_for(&self, key: &str) -> Vec<PathBuf> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.files.get(key).cloned())
            .unwrap_or_default()
    }
}

/// Path component of a URL (`http://host:3000/a?b` -> `/a`)
fn url_path(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = rest.find('/').map_or("/", |i| &rest[i..]);
    path.split(['?', '#']).next().unwrap_or(path)
}

#[async_trait]
impl Page for MockPage {
    async fn goto(&mut self, url: &str) -> PageResult<()> {
        self.stats.record(format!("goto:{url}"));
        let path = url_path(url);
        let Some(document) = self.app.routes.get(path).cloned() else {
            return Err(PageError::Navigation(format!(
                "net::ERR_CONNECTION_REFUSED at {url}"
            )));
        };
        if let Some(status) = document.status {
            if !(200..300).contains(&status) && document.elements.is_empty() {
                return Err(PageError::Navigation(format!("HTTP {status} from {url}")));
            }
        }
        self.state()?.load(url, document);
        Ok(())
    }

    async fn query(
        &self,
        rule: &SelectorRule,
        scope: Option<&ElementRef>,
    ) -> PageResult<Vec<ElementRef>> {
        let state = self.state()?;
        let scope_key = match scope {
            Some(s) => Some(state.live(s)?.key),
            None => None,
        };
        Ok(state
            .document
            .elements
            .iter()
            .filter(|e| state.is_present(e) && e.matches(rule))
            .filter(|e| {
                scope_key
                    .as_deref()
                    .map_or(true, |ancestor| state.is_descendant(e, ancestor))
            })
            .map(|e| state.reference(&e.key))
            .collect())
    }

    async fn click(&self, element: &ElementRef) -> PageResult<()> {
        self.stats.clicks.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.state()?;
        let state = &mut *guard;
        let el = state.live(element)?;
        self.stats.record(format!("click:{}", el.key));
        if let Some(left) = state.stale_clicks_left.get_mut(&el.key) {
            if *left > 0 {
                *left -= 1;
                *state.generation.entry(el.key.clone()).or_insert(0) += 1;
                return Err(PageError::Stale);
            }
        }
        if el.disabled {
            return Err(PageError::Rejected(format!("{} is disabled", el.key)));
        }
        if !el.visible {
            return Err(PageError::Rejected(format!("{} is not visible", el.key)));
        }
        state.apply(&self.app, &el.on_click)
    }

    async fn set_files(&self, element: &ElementRef, paths: &[PathBuf]) -> PageResult<()> {
        let mut state = self.state()?;
        let el = state.live(element)?;
        self.stats.record(format!("files:{}", el.key));
        if !el.file_input {
            return Err(PageError::Rejected(format!("{} is not a file input", el.key)));
        }
        for path in paths {
            if !path.exists() {
                return Err(PageError::Rejected(format!(
                    "file not found: {}",
                    path.display()
                )));
            }
        }
        state.files.insert(el.key.clone(), paths.to_vec());
        state.apply(&self.app, &el.on_files)
    }

    async fn is_visible(&self, element: &ElementRef) -> PageResult<bool> {
        let state = self.state()?;
        Ok(state.live(element)?.visible)
    }

    async fn text_content(&self, element: &ElementRef) -> PageResult<String> {
        let state = self.state()?;
        let el = state.live(element)?;
        let mut text = el.text.clone();
        for child in state
            .document
            .elements
            .iter()
            .filter(|c| state.is_present(c) && state.is_descendant(c, &el.key))
        {
            if !child.text.is_empty() {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(&child.text);
            }
        }
        Ok(text)
    }

    async fn role(&self, element: &ElementRef) -> PageResult<Option<String>> {
        let state = self.state()?;
        Ok(state.live(element)?.role)
    }

    async fn network_activity(&self) -> PageResult<NetworkActivity> {
        let state = self.state()?;
        let idle = !state.document.never_quiescent
            && state
                .document
                .quiescent_after
                .map_or(true, |after| state.loaded_at.elapsed() >= after);
        Ok(NetworkActivity {
            document_complete: true,
            in_flight: Some(usize::from(!idle)),
            resources_seen: state.document.elements.len(),
        })
    }

    async fn screenshot(&self, full_page: bool) -> PageResult<Vec<u8>> {
        self.stats.screenshots.fetch_add(1, Ordering::SeqCst);
        self.stats
            .record(format!("screenshot:{}", if full_page { "full" } else { "viewport" }));
        if self.app.fail_screenshots {
            return Err(PageError::Protocol("mock screenshot failure".to_string()));
        }
        Ok(MOCK_PNG.to_vec())
    }

    fn current_url(&self) -> String {
        self.state
            .lock()
            .map(|s| s.url.clone())
            .unwrap_or_default()
    }
}
