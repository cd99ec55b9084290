//! Sandboxed module loader for the server render bundle.
//! Blocks all network access, filesystem escape, and restricts to .js/.mjs files.

use deno_core::{
    anyhow::{anyhow, Error},
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier,
    ModuleType, RequestedModuleType, ResolutionKind,
};
use std::path::{Path, PathBuf};

/// A module loader that restricts all imports to the server bundle directory.
///
/// Security guarantees:
/// - No network access (http/https/data/blob specifiers rejected)
/// - No filesystem escape (path traversal blocked via canonicalization)
/// - Only .js and .mjs files allowed
/// - Dynamic imports supported but sandboxed
pub struct BundleLoader {
    bundle_dir: PathBuf,
}

/// Specifier prefixes that would reach outside the local bundle.
const REMOTE_PREFIXES: [&str; 4] = ["http://", "https://", "data:", "blob:"];

impl BundleLoader {
    /// Create a loader that only serves modules from `bundle_dir`.
    pub fn new(bundle_dir: impl AsRef<Path>) -> Result<Self, Error> {
        let bundle_dir = bundle_dir.as_ref();
        let canonical = bundle_dir.canonicalize().map_err(|e| {
            anyhow!(
                "Failed to canonicalize server bundle dir '{}': {}",
                bundle_dir.display(),
                e
            )
        })?;

        if !canonical.is_dir() {
            return Err(anyhow!(
                "Server bundle path '{}' must be a directory",
                canonical.display()
            ));
        }

        Ok(Self {
            bundle_dir: canonical,
        })
    }

    /// Resolve the render entry (relative to the bundle dir) to a module
    /// specifier, under the same rules as any import.
    pub fn entry_specifier(&self, entry: &str) -> Result<ModuleSpecifier, Error> {
        let path = self.bundle_dir.join(entry).canonicalize().map_err(|e| {
            anyhow!(
                "Render entry '{}' does not exist inside '{}': {}",
                entry,
                self.bundle_dir.display(),
                e
            )
        })?;
        let specifier = ModuleSpecifier::from_file_path(&path)
            .map_err(|_| anyhow!("Failed to create module specifier for '{}'", path.display()))?;
        self.confine(&specifier)?;
        Ok(specifier)
    }

    /// The file behind `specifier`, provided it is a `.js`/`.mjs` file inside
    /// the bundle. Symlinks and `..` segments are resolved before the check.
    fn confine(&self, specifier: &ModuleSpecifier) -> Result<PathBuf, Error> {
        if specifier.scheme() != "file" {
            return Err(anyhow!(
                "Only file:// URLs allowed, got: {}",
                specifier.scheme()
            ));
        }
        let path = specifier
            .to_file_path()
            .map_err(|_| anyhow!("Failed to convert URL to path: {}", specifier))?;

        match path.canonicalize() {
            Ok(canonical) if canonical.starts_with(&self.bundle_dir) => {}
            _ => {
                return Err(anyhow!(
                    "Access denied: '{}' is outside the server bundle",
                    path.display()
                ))
            }
        }

        match path.extension().and_then(|e| e.to_str()) {
            Some("js" | "mjs") => Ok(path),
            _ => Err(anyhow!(
                "Only .js and .mjs files allowed, got: {}",
                path.display()
            )),
        }
    }
}

impl ModuleLoader for BundleLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, Error> {
        if REMOTE_PREFIXES.iter().any(|prefix| specifier.starts_with(prefix)) {
            return Err(anyhow!("Remote imports are forbidden: {}", specifier));
        }

        let resolved = match specifier {
            s if s.starts_with("./") || s.starts_with("../") => ModuleSpecifier::parse(referrer)
                .map_err(|e| anyhow!("Invalid referrer '{}': {}", referrer, e))?
                .join(s)
                .map_err(|e| anyhow!("Failed to resolve '{}': {}", s, e))?,
            s if s.starts_with("file://") => ModuleSpecifier::parse(s)
                .map_err(|e| anyhow!("Invalid file URL '{}': {}", s, e))?,
            s if s.starts_with('/') => ModuleSpecifier::from_file_path(s)
                .map_err(|_| anyhow!("Invalid absolute path: {}", s))?,
            // Bare specifier, e.g. a hashed chunk name emitted by the bundler
            s => ModuleSpecifier::from_file_path(self.bundle_dir.join(s))
                .map_err(|_| anyhow!("Invalid bare specifier: {}", s))?,
        };

        self.confine(&resolved)?;
        Ok(resolved)
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        // load can be reached with a specifier resolve() never saw
        let source = self.confine(module_specifier).and_then(|path| {
            std::fs::read_to_string(&path)
                .map_err(|e| anyhow!("Failed to read '{}': {}", path.display(), e))
        });

        ModuleLoadResponse::Sync(source.map(|code| {
            ModuleSource::new(
                ModuleType::JavaScript,
                ModuleSourceCode::String(code.into()),
                module_specifier,
                None,
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_blocks_remote_urls() {
        let dir = tempdir().unwrap();
        let loader = BundleLoader::new(dir.path()).unwrap();

        let result = loader.resolve(
            "https://evil.com/payload.js",
            "file:///entry-server.js",
            ResolutionKind::Import,
        );
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Remote imports are forbidden"));
    }

    #[test]
    fn test_blocks_path_traversal() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("entry-server.js"), "export default 1;").unwrap();
        let loader = BundleLoader::new(dir.path()).unwrap();

        let entry = format!("file://{}/entry-server.js", dir.path().display());
        let result = loader.resolve("../../../etc/passwd", &entry, ResolutionKind::Import);
        assert!(result.is_err());
    }

    #[test]
    fn test_resolves_hashed_chunks() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("chunk-4f2a.js"), "export default 1;").unwrap();
        let loader = BundleLoader::new(dir.path()).unwrap();

        let entry = format!("file://{}/entry-server.js", dir.path().display());
        assert!(loader
            .resolve("./chunk-4f2a.js", &entry, ResolutionKind::Import)
            .is_ok());
        assert!(loader
            .resolve("chunk-4f2a.js", &entry, ResolutionKind::DynamicImport)
            .is_ok());
    }

    #[test]
    fn test_blocks_non_js_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("manifest.json"), "{}").unwrap();
        let loader = BundleLoader::new(dir.path()).unwrap();

        let entry = format!("file://{}/entry-server.js", dir.path().display());
        let result = loader.resolve("./manifest.json", &entry, ResolutionKind::Import);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Only .js and .mjs"));
    }

    #[test]
    fn test_entry_specifier_requires_existing_module() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("entry-server.js"), "export function render() {}").unwrap();
        let loader = BundleLoader::new(dir.path()).unwrap();

        let specifier = loader.entry_specifier("entry-server.js").unwrap();
        assert_eq!(specifier.scheme(), "file");
        assert!(specifier.path().ends_with("/entry-server.js"));

        assert!(loader.entry_specifier("missing.js").is_err());
        fs::write(dir.path().join("manifest.json"), "{}").unwrap();
        assert!(loader.entry_specifier("manifest.json").is_err());
    }

    #[test]
    fn test_rejects_file_as_bundle_dir() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("entry-server.js");
        fs::write(&file, "").unwrap();
        assert!(BundleLoader::new(&file).is_err());
    }
}
