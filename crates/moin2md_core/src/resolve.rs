use std::path::PathBuf;

use crate::pathing::{FileKind, PagePath, SOURCE_EXTENSION, probe};

/// Outcome of resolving a wiki link target against the output tree.
///
/// `resolved` is false when neither a directory nor a page file exists for
/// the target yet; the caller still emits `path` and degrades with a warning
/// instead of aborting the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path: String,
    pub resolved: bool,
}

/// Maps link targets to Markdown-relative paths by probing the live output
/// tree. Probes are never cached: pages are written progressively during the
/// same run, so a target that is missing now may exist for a later page.
/// Which links resolve therefore depends on traversal order; forward
/// references degrade to the warning path by design.
#[derive(Debug, Clone)]
pub struct LinkResolver {
    root: PathBuf,
}

impl LinkResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// A target resolved to a directory gets `/index` appended; one resolved
    /// to a bare page file is emitted without its on-disk extension. Rooted
    /// targets (leading `/`) are anchored at the current page's directory,
    /// bare names at the migration root.
    pub fn resolve(&self, current_page: &PagePath, target: &str) -> Resolution {
        let base = if target.starts_with('/') {
            current_page.parent()
        } else {
            PagePath::new("")
        };
        let candidate = base.join(target);

        match probe(&candidate.fs_path(&self.root)) {
            FileKind::Directory => {
                return Resolution {
                    path: format!("{}/index", candidate.to_rel_string()),
                    resolved: true,
                };
            }
            FileKind::Missing | FileKind::File => {}
        }

        let as_page = base.join(&format!("{}.{SOURCE_EXTENSION}", target.trim_end_matches('/')));
        if probe(&as_page.fs_path(&self.root)) == FileKind::File {
            return Resolution {
                path: candidate.to_rel_string(),
                resolved: true,
            };
        }

        Resolution {
            path: target.to_string(),
            resolved: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn rooted_target_resolves_directory_with_index_suffix() {
        let temp = tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("dir/sub")).expect("create dirs");

        let resolver = LinkResolver::new(temp.path());
        let current = PagePath::new("dir/page.md");
        let resolution = resolver.resolve(&current, "/sub");
        assert!(resolution.resolved);
        assert_eq!(resolution.path, "dir/sub/index");
    }

    #[test]
    fn rooted_target_resolves_page_file_without_extension() {
        let temp = tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("dir")).expect("create dir");
        fs::write(temp.path().join("dir/sub.md"), "content").expect("write page");

        let resolver = LinkResolver::new(temp.path());
        let current = PagePath::new("dir/page.md");
        let resolution = resolver.resolve(&current, "/sub");
        assert!(resolution.resolved);
        assert_eq!(resolution.path, "dir/sub");
    }

    #[test]
    fn directory_wins_over_page_file() {
        let temp = tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("dir/sub")).expect("create dirs");
        fs::write(temp.path().join("dir/sub.md"), "content").expect("write page");

        let resolver = LinkResolver::new(temp.path());
        let resolution = resolver.resolve(&PagePath::new("dir/page.md"), "/sub");
        assert_eq!(resolution.path, "dir/sub/index");
    }

    #[test]
    fn bare_target_resolves_against_migration_root() {
        let temp = tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("teams")).expect("create dir");
        fs::write(temp.path().join("overview.md"), "content").expect("write page");

        let resolver = LinkResolver::new(temp.path());
        let current = PagePath::new("deep/nested/page.md");
        assert_eq!(
            resolver.resolve(&current, "teams"),
            Resolution {
                path: "teams/index".to_string(),
                resolved: true,
            }
        );
        assert_eq!(
            resolver.resolve(&current, "overview"),
            Resolution {
                path: "overview".to_string(),
                resolved: true,
            }
        );
    }

    #[test]
    fn missing_target_degrades_unresolved() {
        let temp = tempdir().expect("tempdir");
        let resolver = LinkResolver::new(temp.path());
        let resolution = resolver.resolve(&PagePath::new("page.md"), "nowhere");
        assert!(!resolution.resolved);
        assert_eq!(resolution.path, "nowhere");
    }

    #[test]
    fn probes_are_live_not_cached() {
        let temp = tempdir().expect("tempdir");
        let resolver = LinkResolver::new(temp.path());
        let current = PagePath::new("page.md");

        assert!(!resolver.resolve(&current, "later").resolved);
        fs::write(temp.path().join("later.md"), "content").expect("write page");
        assert!(resolver.resolve(&current, "later").resolved);
    }
}
