//! Screenshot artifacts and scenario fixtures.
//!
//! Captures are evidence, not comparisons: the bytes are written where the
//! scenario asks and recorded with their length and SHA-256 digest. A failed
//! write is reported as [`CaptureOutcome::IoFailure`]; callers on the failure
//! path log it and keep the original failure.

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;

use crate::result::{LookoutError, LookoutResult};
use crate::session::Page;

/// 1x1 transparent PNG
pub const PNG_1X1: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR\x00\x00\x00\x01\x00\x00\x00\x01\x08\x06\x00\x00\x00\x1f\x15\xc4\x89\x00\x00\x00\nIDATx\x9cc\x00\x01\x00\x00\x05\x00\x01\r\n-\xb4\x00\x00\x00\x00IEND\xaeB`\x82";

// =============================================================================
// CAPTURE
// =============================================================================

/// Screenshot extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Visible viewport only
    #[default]
    Viewport,
    /// Whole scrollable page
    FullPage,
}

impl CaptureMode {
    /// Whether the driver should capture beyond the viewport
    #[must_use]
    pub const fn is_full_page(self) -> bool {
        matches!(self, Self::FullPage)
    }
}

/// A written artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Where the bytes were written
    pub path: PathBuf,
    /// Capture extent
    pub mode: CaptureMode,
    /// Byte length
    pub bytes: usize,
    /// Hex SHA-256 of the bytes
    pub sha256: String,
    /// Captured on the failure path
    pub on_failure: bool,
}

/// Outcome of [`snapshot`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Artifact written
    Written(Artifact),
    /// Screenshot or write failed
    IoFailure(String),
}

/// Hex SHA-256 digest
#[must_use]
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Capture the page and write it to `path`, creating parent directories
pub async fn snapshot(
    page: &dyn Page,
    path: &Path,
    mode: CaptureMode,
    on_failure: bool,
) -> CaptureOutcome {
    let bytes = match page.screenshot(mode.is_full_page()).await {
        Ok(b) => b,
        Err(e) => return CaptureOutcome::IoFailure(format!("screenshot failed: {e}")),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return CaptureOutcome::IoFailure(format!("{}: {e}", parent.display()));
        }
    }
    if let Err(e) = tokio::fs::write(path, &bytes).await {
        return CaptureOutcome::IoFailure(format!("{}: {e}", path.display()));
    }
    tracing::info!(path = %path.display(), bytes = bytes.len(), "artifact written");
    CaptureOutcome::Written(Artifact {
        path: path.to_path_buf(),
        mode,
        bytes: bytes.len(),
        sha256: digest(&bytes),
        on_failure,
    })
}

// =============================================================================
// FIXTURES
// =============================================================================

/// Built-in fixture payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinFixture {
    /// [`PNG_1X1`]
    #[serde(rename = "png_1x1")]
    Png1x1,
}

impl BuiltinFixture {
    const fn bytes(self) -> &'static [u8] {
        match self {
            Self::Png1x1 => PNG_1X1,
        }
    }

    const fn default_file_name(self) -> &'static str {
        match self {
            Self::Png1x1 => "fixture.png",
        }
    }
}

/// Where a fixture's bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureSource {
    /// Built-in payload
    Builtin(BuiltinFixture),
    /// Inline base64 bytes
    Base64(String),
    /// Existing file, used in place and never removed
    Path(PathBuf),
}

/// A file made available to `set_files` actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    /// Payload source
    #[serde(flatten)]
    pub source: FixtureSource,
    /// File name to write generated bytes under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl Fixture {
    /// Built-in fixture
    #[must_use]
    pub const fn builtin(kind: BuiltinFixture) -> Self {
        Self {
            source: FixtureSource::Builtin(kind),
            file_name: None,
        }
    }

    /// Fixture backed by an existing file
    #[must_use]
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            source: FixtureSource::Path(path.into()),
            file_name: None,
        }
    }

    /// Set the file name generated bytes are written under
    #[must_use]
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Short description for step plans
    #[must_use]
    pub fn describe(&self) -> String {
        let source = match self.source {
            FixtureSource::Builtin(BuiltinFixture::Png1x1) => "builtin png_1x1".to_string(),
            FixtureSource::Base64(ref data) => format!("inline base64 ({} chars)", data.len()),
            FixtureSource::Path(ref path) => return format!("file {}", path.display()),
        };
        match self.file_name {
            Some(ref name) => format!("{source} as {name}"),
            None => source,
        }
    }
}

/// Fixtures materialised on disk for one run
#[derive(Debug, Default)]
pub struct PreparedFixtures {
    dir: Option<TempDir>,
    paths: HashMap<String, PathBuf>,
}

/// Whether `name` is a single plain file name, with no directory parts
pub(crate) fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// File name a generated fixture is written under
pub(crate) fn fixture_file_name(name: &str, fixture: &Fixture) -> String {
    let default_name = match fixture.source {
        FixtureSource::Builtin(kind) => kind.default_file_name(),
        FixtureSource::Base64(_) | FixtureSource::Path(_) => "fixture.bin",
    };
    fixture
        .file_name
        .clone()
        .unwrap_or_else(|| format!("{name}-{default_name}"))
}

impl PreparedFixtures {
    /// Materialise `fixtures`. Generated bytes go to a fresh directory under
    /// the system temp dir; path fixtures are checked for readability.
    ///
    /// # Errors
    ///
    /// Returns an error if a fixture cannot be decoded, read or written.
    /// Anything written before the error is removed.
    pub async fn prepare(fixtures: &BTreeMap<String, Fixture>) -> LookoutResult<Self> {
        let mut prepared = Self::default();
        for (name, fixture) in fixtures {
            if let Err(e) = prepared.add(name, fixture).await {
                prepared.cleanup().await;
                return Err(e);
            }
        }
        Ok(prepared)
    }

    async fn add(&mut self, name: &str, fixture: &Fixture) -> LookoutResult<()> {
        let bytes = match fixture.source {
            FixtureSource::Path(ref path) => {
                tokio::fs::metadata(path).await.map_err(|e| {
                    LookoutError::config(format!("fixture '{name}' ({}): {e}", path.display()))
                })?;
                self.paths.insert(name.to_string(), path.clone());
                return Ok(());
            }
            FixtureSource::Builtin(kind) => kind.bytes().to_vec(),
            FixtureSource::Base64(ref data) => base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|e| LookoutError::config(format!("fixture '{name}': {e}")))?,
        };
        let file_name = fixture_file_name(name, fixture);
        if !is_plain_file_name(&file_name) {
            return Err(LookoutError::config(format!(
                "fixture '{name}': file name '{file_name}' must not contain directories"
            )));
        }
        let path = self.dir()?.join(file_name);
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(fixture = name, path = %path.display(), "fixture written");
        self.paths.insert(name.to_string(), path);
        Ok(())
    }

    fn dir(&mut self) -> LookoutResult<&Path> {
        if self.dir.is_none() {
            let dir = tempfile::Builder::new().prefix("lookout-fixtures-").tempdir()?;
            self.dir = Some(dir);
        }
        match self.dir {
            Some(ref dir) => Ok(dir.path()),
            None => Err(LookoutError::config("fixture directory unavailable")),
        }
    }

    /// On-disk path of a fixture
    #[must_use]
    pub fn path(&self, name: &str) -> Option<&Path> {
        self.paths.get(name).map(PathBuf::as_path)
    }

    /// Remove generated fixtures. Failures are logged and ignored.
    pub async fn cleanup(&mut self) {
        self.paths.clear();
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            let closed = tokio::task::spawn_blocking(move || dir.close()).await;
            match closed {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(path = %path.display(), error = %e, "fixture directory not removed");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "fixture cleanup task failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{BrowserConfig, Viewport};
    use crate::mock::{MockApp, MockDocument, MockLauncher, MOCK_PNG};
    use crate::session::Launcher;

    async fn page(app: MockApp) -> Box<dyn Page> {
        let launcher = MockLauncher::new(app.route("/", MockDocument::new()));
        let mut session = launcher.launch(&BrowserConfig::default()).await.unwrap();
        let mut context = session.new_context(Viewport::default()).await.unwrap();
        let mut page = context.new_page().await.unwrap();
        page.goto("http://localhost:3000/").await.unwrap();
        page
    }

    mod snapshot_tests {
        use super::*;

        #[tokio::test]
        async fn test_written_with_digest_and_parents() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("nested/shot.png");
            let page = page(MockApp::new()).await;
            let outcome = snapshot(page.as_ref(), &path, CaptureMode::FullPage, false).await;
            let CaptureOutcome::Written(artifact) = outcome else {
                panic!("expected written");
            };
            assert_eq!(artifact.bytes, MOCK_PNG.len());
            assert_eq!(artifact.sha256, digest(MOCK_PNG));
            assert_eq!(artifact.mode, CaptureMode::FullPage);
            assert_eq!(std::fs::read(&path).unwrap(), MOCK_PNG);
        }

        #[tokio::test]
        async fn test_screenshot_failure_is_io_failure() {
            let dir = tempfile::tempdir().unwrap();
            let page = page(MockApp::new().failing_screenshots()).await;
            let outcome =
                snapshot(page.as_ref(), &dir.path().join("x.png"), CaptureMode::Viewport, true).await;
            assert!(matches!(outcome, CaptureOutcome::IoFailure(_)));
        }

        #[tokio::test]
        async fn test_unwritable_path_is_io_failure() {
            let dir = tempfile::tempdir().unwrap();
            let blocker = dir.path().join("file");
            std::fs::write(&blocker, b"x").unwrap();
            let page = page(MockApp::new()).await;
            let outcome =
                snapshot(page.as_ref(), &blocker.join("shot.png"), CaptureMode::Viewport, false).await;
            assert!(matches!(outcome, CaptureOutcome::IoFailure(_)));
        }

        #[test]
        fn test_digest_known_value() {
            assert_eq!(
                digest(b""),
                "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
            );
        }
    }

    mod fixture_tests {
        use super::*;

        #[test]
        fn test_describe() {
            let builtin = Fixture::builtin(BuiltinFixture::Png1x1).with_file_name("dummy.png");
            assert_eq!(builtin.describe(), "builtin png_1x1 as dummy.png");
            assert_eq!(Fixture::path("a/b.png").describe(), "file a/b.png");
        }

        #[tokio::test]
        async fn test_builtin_written_and_removed() {
            let mut fixtures = BTreeMap::new();
            fixtures.insert("dummy".to_string(), Fixture::builtin(BuiltinFixture::Png1x1));
            let mut prepared = PreparedFixtures::prepare(&fixtures).await.unwrap();
            let path = prepared.path("dummy").unwrap().to_path_buf();
            assert_eq!(std::fs::read(&path).unwrap(), PNG_1X1);
            prepared.cleanup().await;
            assert!(!path.exists());
            assert!(prepared.path("dummy").is_none());
        }

        #[tokio::test]
        async fn test_path_fixture_kept() {
            let dir = tempfile::tempdir().unwrap();
            let existing = dir.path().join("mine.png");
            std::fs::write(&existing, PNG_1X1).unwrap();
            let mut fixtures = BTreeMap::new();
            fixtures.insert("mine".to_string(), Fixture::path(&existing));
            let mut prepared = PreparedFixtures::prepare(&fixtures).await.unwrap();
            assert_eq!(prepared.path("mine").unwrap(), existing.as_path());
            prepared.cleanup().await;
            assert!(existing.exists());
        }

        #[tokio::test]
        async fn test_bad_base64_rejected() {
            let mut fixtures = BTreeMap::new();
            fixtures.insert(
                "bad".to_string(),
                Fixture {
                    source: FixtureSource::Base64("%%%".to_string()),
                    file_name: None,
                },
            );
            assert!(PreparedFixtures::prepare(&fixtures).await.is_err());
        }

        #[test]
        fn test_yaml_forms() {
            let f: Fixture = serde_yaml_ng::from_str("builtin: png_1x1").unwrap();
            assert_eq!(f, Fixture::builtin(BuiltinFixture::Png1x1));
            let f: Fixture =
                serde_yaml_ng::from_str("base64: aGk=\nfile_name: hi.txt").unwrap();
            assert_eq!(f.source, FixtureSource::Base64("aGk=".to_string()));
            assert_eq!(f.file_name.as_deref(), Some("hi.txt"));
        }

        #[test]
        fn test_plain_file_names() {
            assert!(is_plain_file_name("dummy.png"));
            assert!(is_plain_file_name("upload-fixture.png"));
            assert!(!is_plain_file_name("../escape.png"));
            assert!(!is_plain_file_name("nested/dummy.png"));
            assert!(!is_plain_file_name("/tmp/dummy.png"));
            assert!(!is_plain_file_name(".."));
            assert!(!is_plain_file_name(""));
        }

        #[tokio::test]
        async fn test_file_name_outside_directory_rejected() {
            let outside = std::env::temp_dir().join("lookout-escaped-fixture.png");
            let mut fixtures = BTreeMap::new();
            fixtures.insert(
                "dummy".to_string(),
                Fixture::builtin(BuiltinFixture::Png1x1)
                    .with_file_name("../lookout-escaped-fixture.png"),
            );
            let err = PreparedFixtures::prepare(&fixtures).await.unwrap_err();
            assert!(err.to_string().contains("must not contain directories"));
            assert!(!outside.exists());
        }

        #[tokio::test]
        async fn test_fixture_key_with_directories_rejected() {
            let mut fixtures = BTreeMap::new();
            fixtures.insert("../up".to_string(), Fixture::builtin(BuiltinFixture::Png1x1));
            assert!(PreparedFixtures::prepare(&fixtures).await.is_err());
        }

        #[tokio::test]
        async fn test_cleanup_removes_directory() {
            let mut fixtures = BTreeMap::new();
            fixtures.insert("dummy".to_string(), Fixture::builtin(BuiltinFixture::Png1x1));
            let mut prepared = PreparedFixtures::prepare(&fixtures).await.unwrap();
            let dir = prepared.path("dummy").unwrap().parent().unwrap().to_path_buf();
            assert!(dir.file_name().unwrap().to_string_lossy().starts_with("lookout-fixtures-"));
            prepared.cleanup().await;
            assert!(!dir.exists());
        }
    }
}
