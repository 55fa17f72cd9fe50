/// Two-layer path resolution
///
/// Exercise files live either in the student workspace (mutable) or in the
/// unpacked course runtime (read-only). A logical path resolves against the
/// workspace first, then the runtime root. A candidate is accepted only if it
/// exists and its canonical form stays inside the canonical base, so `..`
/// segments, absolute paths and symlinks pointing outside are all rejected.
use progy_common::error::EngineError;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Entry files probed, in order, inside a directory exercise
pub const ENTRY_CANDIDATES: &[&str] = &[
    "exercise.rs",
    "exercise.sql",
    "exercise.py",
    "exercise.ts",
    "exercise.js",
    "main.rs",
    "index.ts",
    "main.go",
    "index.js",
    "main.py",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Workspace,
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub layer: Layer,
    /// Canonical base directory of the layer
    pub base: PathBuf,
    /// Canonical absolute path
    pub absolute: PathBuf,
    /// Path relative to `base`
    pub relative: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    workspace: PathBuf,
    runtime: Option<PathBuf>,
}

impl PathResolver {
    pub fn new(workspace: impl Into<PathBuf>, runtime: Option<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            runtime,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn runtime(&self) -> Option<&Path> {
        self.runtime.as_deref()
    }

    /// First layer under which `logical` exists and stays contained
    pub fn resolve(&self, logical: &str) -> Result<ResolvedPath, EngineError> {
        let layers = std::iter::once((Layer::Workspace, self.workspace.as_path()))
            .chain(self.runtime.as_deref().map(|r| (Layer::Runtime, r)));

        for (layer, base) in layers {
            if let Some((base, absolute)) = resolve_within(base, Path::new(logical)) {
                let relative = absolute
                    .strip_prefix(&base)
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                debug!(logical, ?layer, path = %absolute.display(), "Resolved path");
                return Ok(ResolvedPath {
                    layer,
                    base,
                    absolute,
                    relative,
                });
            }
        }

        Err(EngineError::PathNotFound {
            path: logical.to_string(),
        })
    }

    /// Resolve a runnable file. Directories are probed for the first existing
    /// entry candidate; a directory without one is `NoEntryFile`.
    pub fn resolve_entry(&self, logical: &str) -> Result<ResolvedPath, EngineError> {
        let resolved = self.resolve(logical)?;
        if resolved.absolute.is_file() {
            return Ok(resolved);
        }

        match find_entry_file(&resolved.absolute) {
            Some(name) => {
                let child = format!("{}/{}", logical.trim_end_matches('/'), name);
                // Re-resolve so the entry itself is containment-checked
                self.resolve(&child)
            }
            None => Err(EngineError::NoEntryFile {
                path: logical.to_string(),
            }),
        }
    }
}

/// First entry candidate present in `dir`
pub fn find_entry_file(dir: &Path) -> Option<&'static str> {
    ENTRY_CANDIDATES
        .iter()
        .copied()
        .find(|candidate| dir.join(candidate).is_file())
}

/// Canonical `(base, base + logical)` if the target exists and is contained
pub fn resolve_within(base: &Path, logical: &Path) -> Option<(PathBuf, PathBuf)> {
    // Lexical check first: only plain segments (and `.`) are allowed
    let lexically_safe = logical
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !lexically_safe || logical.as_os_str().is_empty() {
        return None;
    }

    let canonical_base = base.canonicalize().ok()?;
    let candidate = canonical_base.join(logical).canonicalize().ok()?;

    if candidate.starts_with(&canonical_base) {
        Some((canonical_base, candidate))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn layout() -> (TempDir, TempDir) {
        let workspace = TempDir::new().unwrap();
        let runtime = TempDir::new().unwrap();
        fs::create_dir_all(workspace.path().join("content/01_intro/01_hello")).unwrap();
        fs::write(
            workspace.path().join("content/01_intro/01_hello/exercise.py"),
            "print('hi')",
        )
        .unwrap();
        fs::create_dir_all(runtime.path().join("content/02_more/01_loops")).unwrap();
        fs::write(runtime.path().join("content/02_more/01_loops/main.py"), "").unwrap();
        fs::write(runtime.path().join("content/02_more/01_loops/exercise.rs"), "").unwrap();
        (workspace, runtime)
    }

    #[test]
    fn test_resolves_workspace_first() {
        let (workspace, runtime) = layout();
        fs::create_dir_all(runtime.path().join("content/01_intro/01_hello")).unwrap();
        let resolver = PathResolver::new(workspace.path(), Some(runtime.path().to_path_buf()));

        let resolved = resolver.resolve("content/01_intro/01_hello").unwrap();
        assert_eq!(resolved.layer, Layer::Workspace);
        assert_eq!(resolved.relative, PathBuf::from("content/01_intro/01_hello"));
    }

    #[test]
    fn test_falls_back_to_runtime_layer() {
        let (workspace, runtime) = layout();
        let resolver = PathResolver::new(workspace.path(), Some(runtime.path().to_path_buf()));

        let resolved = resolver.resolve("content/02_more/01_loops").unwrap();
        assert_eq!(resolved.layer, Layer::Runtime);
    }

    #[test]
    fn test_rejects_traversal_and_absolute_paths() {
        let (workspace, runtime) = layout();
        let resolver = PathResolver::new(workspace.path(), Some(runtime.path().to_path_buf()));

        for logical in ["../../etc/passwd", "/etc/passwd", "content/../../etc/passwd", ""] {
            assert!(
                matches!(resolver.resolve(logical), Err(EngineError::PathNotFound { .. })),
                "expected {logical:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_within_rejects_regardless_of_base() {
        let (workspace, _runtime) = layout();
        assert!(resolve_within(workspace.path(), Path::new("../../etc/passwd")).is_none());
        assert!(resolve_within(workspace.path(), Path::new("/etc/passwd")).is_none());
        assert!(resolve_within(Path::new("/"), Path::new("../etc/passwd")).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let (workspace, runtime) = layout();
        std::os::unix::fs::symlink(runtime.path(), workspace.path().join("escape")).unwrap();
        let resolver = PathResolver::new(workspace.path(), None);
        assert!(resolver.resolve("escape/content").is_err());
    }

    #[test]
    fn test_missing_path_not_found() {
        let (workspace, _runtime) = layout();
        let resolver = PathResolver::new(workspace.path(), None);
        assert!(matches!(
            resolver.resolve("content/99_missing"),
            Err(EngineError::PathNotFound { .. })
        ));
    }

    #[test]
    fn test_entry_probe_uses_candidate_order() {
        let (workspace, runtime) = layout();
        let resolver = PathResolver::new(workspace.path(), Some(runtime.path().to_path_buf()));

        let entry = resolver.resolve_entry("content/02_more/01_loops").unwrap();
        // exercise.rs comes before main.py in the candidate list
        assert!(entry.absolute.ends_with("exercise.rs"));
        assert_eq!(entry.layer, Layer::Runtime);
    }

    #[test]
    fn test_directory_without_entry_is_distinct_error() {
        let (workspace, _runtime) = layout();
        fs::create_dir_all(workspace.path().join("content/01_intro/02_empty")).unwrap();
        fs::write(workspace.path().join("content/01_intro/02_empty/README.md"), "# hi").unwrap();
        let resolver = PathResolver::new(workspace.path(), None);

        assert!(matches!(
            resolver.resolve_entry("content/01_intro/02_empty"),
            Err(EngineError::NoEntryFile { .. })
        ));
    }

    #[test]
    fn test_file_entry_resolves_directly() {
        let (workspace, _runtime) = layout();
        let resolver = PathResolver::new(workspace.path(), None);
        let entry = resolver
            .resolve_entry("content/01_intro/01_hello/exercise.py")
            .unwrap();
        assert!(entry.absolute.is_file());
    }
}
