//! Asset resolution: where the page template and static files come from.
//!
//! The strategy is picked once at startup from the environment mode and
//! injected into the dispatcher: [`StaticAssets`] serves the client build
//! output in production, [`crate::dev::DevAssets`] asks the dev server.

use async_trait::async_trait;
use axum::http::request::Parts;
use axum::response::Response;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dev server error: {0}")]
    DevServer(String),
}

impl AssetError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A static file read fully into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub content: Vec<u8>,
    pub content_type: &'static str,
}

/// Errors that mean "no such file" rather than a failed read: the path does
/// not exist, a parent component is a regular file, or the name is too long.
fn is_missing(err: &std::io::Error) -> bool {
    if err.kind() == std::io::ErrorKind::NotFound {
        return true;
    }
    // ENOTDIR, ENAMETOOLONG
    #[cfg(target_os = "linux")]
    let codes = [20, 36];
    #[cfg(target_os = "macos")]
    let codes = [20, 63];
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    let codes: [i32; 0] = [];
    err.raw_os_error().is_some_and(|code| codes.contains(&code))
}

/// Content type by file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("svg") => "image/svg+xml",
        Some("html") => "text/html",
        _ => "application/octet-stream",
    }
}

#[async_trait]
pub trait AssetSource: Send + Sync {
    /// The raw page template for `url`.
    async fn template(&self, url: &str) -> Result<String, AssetError>;

    /// A static file for `path`, or `None` when there is none to serve.
    async fn static_asset(&self, path: &str) -> Result<Option<Asset>, AssetError>;

    /// Answer the request before it reaches the dispatcher, if this source
    /// owns it.
    async fn intercept(&self, _parts: &Parts) -> Result<Option<Response>, AssetError> {
        Ok(None)
    }
}

/// Production strategy: the client build output on disk.
#[derive(Debug)]
pub struct StaticAssets {
    root: PathBuf,
    template_path: PathBuf,
    template: Arc<str>,
}

impl StaticAssets {
    /// Canonicalize `root` and read the template once; it does not change
    /// while the process runs.
    pub async fn load(root: impl AsRef<Path>, template: &str) -> Result<Self, AssetError> {
        let root = root.as_ref();
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| AssetError::io(root, e))?;
        let template_path = root.join(template);
        let html = tokio::fs::read_to_string(&template_path)
            .await
            .map_err(|e| AssetError::io(&template_path, e))?;
        let template_path = tokio::fs::canonicalize(&template_path)
            .await
            .map_err(|e| AssetError::io(&template_path, e))?;

        tracing::info!(root = %root.display(), template = %template_path.display(), "serving client build");
        Ok(Self {
            root,
            template_path,
            template: Arc::from(html),
        })
    }

    /// Map a request path to a file under the build root. Anything that
    /// resolves outside the root, to a directory, or to the template itself
    /// is a miss.
    async fn locate(&self, path: &str) -> Result<Option<PathBuf>, AssetError> {
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            return Ok(None);
        }

        let candidate = self.root.join(relative);
        let canonical = match tokio::fs::canonicalize(&candidate).await {
            Ok(canonical) => canonical,
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) => return Err(AssetError::io(candidate, e)),
        };

        if !canonical.starts_with(&self.root) {
            tracing::debug!(path, "static lookup escaped the build root");
            return Ok(None);
        }
        if canonical == self.template_path {
            return Ok(None);
        }

        let metadata = tokio::fs::metadata(&canonical)
            .await
            .map_err(|e| AssetError::io(&canonical, e))?;
        if !metadata.is_file() {
            return Ok(None);
        }
        Ok(Some(canonical))
    }
}

#[async_trait]
impl AssetSource for StaticAssets {
    async fn template(&self, _url: &str) -> Result<String, AssetError> {
        Ok(self.template.to_string())
    }

    async fn static_asset(&self, path: &str) -> Result<Option<Asset>, AssetError> {
        let Some(file) = self.locate(path).await? else {
            return Ok(None);
        };
        match tokio::fs::read(&file).await {
            Ok(content) => Ok(Some(Asset {
                content,
                content_type: content_type_for(&file),
            })),
            // removed between lookup and read
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(AssetError::io(file, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const INDEX_HTML: &str =
        "<head><!--app-head--></head><!--app-html--><script>window.__INITIAL_DATA__ = undefined</script>";

    fn build_dir() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("assets")).unwrap();
        fs::write(dir.path().join("index.html"), INDEX_HTML).unwrap();
        fs::write(dir.path().join("assets/app.js"), "console.log('app')").unwrap();
        fs::write(dir.path().join("assets/app.css"), "body{}").unwrap();
        fs::write(dir.path().join("assets/logo.svg"), "<svg/>").unwrap();
        fs::write(dir.path().join("assets/font.woff2"), [0u8, 1, 2]).unwrap();
        dir
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for(Path::new("/assets/app.js")), "application/javascript");
        assert_eq!(content_type_for(Path::new("app.css")), "text/css");
        assert_eq!(content_type_for(Path::new("logo.svg")), "image/svg+xml");
        assert_eq!(content_type_for(Path::new("about.html")), "text/html");
        assert_eq!(content_type_for(Path::new("font.woff2")), "application/octet-stream");
        assert_eq!(content_type_for(Path::new("LICENSE")), "application/octet-stream");
    }

    #[tokio::test]
    async fn serves_files_from_build_root() {
        let dir = build_dir();
        let assets = StaticAssets::load(dir.path(), "index.html").await.unwrap();

        let js = assets.static_asset("/assets/app.js").await.unwrap().unwrap();
        assert_eq!(js.content_type, "application/javascript");
        assert_eq!(js.content, b"console.log('app')");

        let font = assets.static_asset("/assets/font.woff2").await.unwrap().unwrap();
        assert_eq!(font.content_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn misses_fall_through() {
        let dir = build_dir();
        let assets = StaticAssets::load(dir.path(), "index.html").await.unwrap();

        assert!(assets.static_asset("/admin/kategori").await.unwrap().is_none());
        assert!(assets.static_asset("/").await.unwrap().is_none());
        assert!(assets.static_asset("/assets").await.unwrap().is_none());
        assert!(assets.static_asset("/index.html").await.unwrap().is_none());
        assert!(assets.static_asset("/../../etc/passwd").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_as_parent_component_is_a_miss() {
        let dir = build_dir();
        let assets = StaticAssets::load(dir.path(), "index.html").await.unwrap();

        assert!(assets.static_asset("/assets/app.js/x").await.unwrap().is_none());
        assert!(assets.static_asset("/index.html/admin").await.unwrap().is_none());
        let long_name = format!("/{}", "a".repeat(4096));
        assert!(assets.static_asset(&long_name).await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn other_io_errors_are_reported() {
        let dir = build_dir();
        std::os::unix::fs::symlink("loop.js", dir.path().join("loop.js")).unwrap();
        let assets = StaticAssets::load(dir.path(), "index.html").await.unwrap();

        let err = assets.static_asset("/loop.js").await.unwrap_err();
        assert!(matches!(err, AssetError::Io { .. }));
    }

    #[tokio::test]
    async fn template_is_read_once() {
        let dir = build_dir();
        let assets = StaticAssets::load(dir.path(), "index.html").await.unwrap();
        fs::write(dir.path().join("index.html"), "changed").unwrap();

        assert_eq!(assets.template("/berita").await.unwrap(), INDEX_HTML);
    }

    #[tokio::test]
    async fn missing_template_fails_at_startup() {
        let dir = tempdir().unwrap();
        let err = StaticAssets::load(dir.path(), "index.html").await.unwrap_err();
        assert!(matches!(err, AssetError::Io { .. }));
    }
}
