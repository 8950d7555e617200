//! Browser-session capability.
//!
//! The harness never talks to a browser engine directly. It goes through the
//! narrow [`Launcher`] / [`BrowserSession`] / [`BrowserContext`] / [`Page`]
//! traits so the Chromium driver in [`crate::browser`] and the in-memory
//! driver in [`crate::mock`] are interchangeable.
//!
//! ```text
//! Launcher::launch(config) -> BrowserSession
//!   BrowserSession::new_context(viewport) -> BrowserContext
//!     BrowserContext::new_page() -> Page
//!       goto / query / click / set_files / is_visible / screenshot
//!   BrowserSession::close()
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::config::{BrowserConfig, Viewport};
use crate::result::LookoutResult;
use crate::selector::SelectorRule;

/// Opaque reference to a live element.
///
/// It does not keep the element alive: once the DOM node is replaced, page
/// operations on the reference fail with [`PageError::Stale`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef(String);

impl ElementRef {
    /// Wrap a driver-specific element id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Driver-specific id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors reported by a page driver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    /// Target unreachable or load failed
    #[error("navigation failed: {0}")]
    Navigation(String),
    /// Element reference no longer points into the document
    #[error("element is no longer attached to the document")]
    Stale,
    /// The page refused the interaction (disabled control, not a file input, ...)
    #[error("action rejected: {0}")]
    Rejected(String),
    /// Transport or protocol failure
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type for page operations
pub type PageResult<T> = Result<T, PageError>;

/// Snapshot of the page's network and load state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkActivity {
    /// `document.readyState == "complete"`
    pub document_complete: bool,
    /// Requests currently in flight, when the driver can tell
    pub in_flight: Option<usize>,
    /// Resources fetched so far
    pub resources_seen: usize,
}

/// A page in an isolated browser context
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate to an absolute URL
    async fn goto(&mut self, url: &str) -> PageResult<()>;

    /// All elements matching `rule`, in document order, optionally inside `scope`
    async fn query(
        &self,
        rule: &SelectorRule,
        scope: Option<&ElementRef>,
    ) -> PageResult<Vec<ElementRef>>;

    /// Click an element
    async fn click(&self, element: &ElementRef) -> PageResult<()>;

    /// Set the files of a file input
    async fn set_files(&self, element: &ElementRef, paths: &[PathBuf]) -> PageResult<()>;

    /// Whether an element is rendered and visible
    async fn is_visible(&self, element: &ElementRef) -> PageResult<bool>;

    /// Rendered text of an element
    async fn text_content(&self, element: &ElementRef) -> PageResult<String>;

    /// Explicit or implicit ARIA role of an element
    async fn role(&self, element: &ElementRef) -> PageResult<Option<String>>;

    /// Current network/load state
    async fn network_activity(&self) -> PageResult<NetworkActivity>;

    /// PNG screenshot of the viewport or the full scrollable page
    async fn screenshot(&self, full_page: bool) -> PageResult<Vec<u8>>;

    /// URL of the current document
    fn current_url(&self) -> String;
}

/// An isolated browsing context (own cookies, storage and viewport)
#[async_trait]
pub trait BrowserContext: Send {
    /// Open a new page in this context
    async fn new_page(&mut self) -> PageResult<Box<dyn Page>>;

    /// Viewport pages in this context are created with
    fn viewport(&self) -> Viewport;
}

/// A launched browser
#[async_trait]
pub trait BrowserSession: Send {
    /// Create an isolated context with the given viewport
    async fn new_context(&mut self, viewport: Viewport) -> PageResult<Box<dyn BrowserContext>>;

    /// Shut the browser down
    async fn close(&mut self) -> PageResult<()>;
}

/// Factory for browser sessions
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Launch a new browser session
    async fn launch(&self, config: &BrowserConfig) -> LookoutResult<Box<dyn BrowserSession>>;
}

// =============================================================================
// SESSION GUARD
// =============================================================================

/// Owns a session and closes it exactly once.
///
/// [`SessionGuard::release`] is the normal path. If the guard is dropped
/// while still holding the session (the run future was dropped mid-flight),
/// the close is scheduled on the current tokio runtime.
pub struct SessionGuard {
    session: Option<Box<dyn BrowserSession>>,
    name: String,
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("name", &self.name)
            .field("held", &self.session.is_some())
            .finish()
    }
}

impl SessionGuard {
    /// Take ownership of `session`
    #[must_use]
    pub fn new(session: Box<dyn BrowserSession>, name: impl Into<String>) -> Self {
        Self {
            session: Some(session),
            name: name.into(),
        }
    }

    /// Whether the session is still held
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.session.is_some()
    }

    /// Borrow the live session
    pub fn session_mut(&mut self) -> Option<&mut (dyn BrowserSession + 'static)> {
        self.session.as_deref_mut()
    }

    /// Close the session if still held.
    ///
    /// Returns `true` when this call performed the close. Close errors are
    /// logged, not returned: by the time a session is released the run
    /// outcome is already decided.
    pub async fn release(&mut self) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };
        if let Err(e) = session.close().await {
            tracing::warn!(scenario = %self.name, error = %e, "session close failed");
        } else {
            tracing::debug!(scenario = %self.name, "session released");
        }
        true
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        tracing::warn!(scenario = %self.name, "session dropped without release, closing in background");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let name = std::mem::take(&mut self.name);
            handle.spawn(async move {
                if let Err(e) = session.close().await {
                    tracing::warn!(scenario = %name, error = %e, "background session close failed");
                }
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mock::MockLauncher;

    #[test]
    fn test_element_ref_roundtrip() {
        let el = ElementRef::new("e-7");
        assert_eq!(el.id(), "e-7");
        assert_eq!(el.to_string(), "e-7");
    }

    #[tokio::test]
    async fn test_guard_releases_once() {
        let launcher = MockLauncher::new(crate::mock::MockApp::new());
        let session = launcher.launch(&BrowserConfig::default()).await.unwrap();
        let mut guard = SessionGuard::new(session, "once");
        assert!(guard.is_held());
        assert!(guard.release().await);
        assert!(!guard.release().await);
        assert!(!guard.is_held());
        assert_eq!(launcher.stats().closes(), 1);
    }

    #[tokio::test]
    async fn test_guard_drop_closes_in_background() {
        let launcher = MockLauncher::new(crate::mock::MockApp::new());
        let session = launcher.launch(&BrowserConfig::default()).await.unwrap();
        drop(SessionGuard::new(session, "dropped"));
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(launcher.stats().closes(), 1);
    }
}
