use std::fs;
use std::path::{Path, PathBuf};

/// Existence class of a path in the partially-built output tree.
///
/// Never cached: pages and attachments are written progressively during a
/// run, so every caller re-probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Missing,
    Directory,
    File,
}

pub fn probe(path: &Path) -> FileKind {
    match fs::metadata(path) {
        Err(_) => FileKind::Missing,
        Ok(metadata) if metadata.is_dir() => FileKind::Directory,
        Ok(_) => FileKind::File,
    }
}

/// Extension pages are stored with on disk.
pub const SOURCE_EXTENSION: &str = "md";

/// A slash-separated page path relative to the migration root, held as an
/// ordered list of segments so prefix/suffix handling never slices at a
/// character offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePath {
    segments: Vec<String>,
}

impl PagePath {
    pub fn new(raw: &str) -> Self {
        let segments = raw
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(ToString::to_string)
            .collect();
        Self { segments }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Path with the last segment dropped (the page's directory).
    pub fn parent(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Append a slash-separated suffix; empty segments in the suffix are
    /// dropped, so joining a rooted target like "/sub/page" works the same
    /// as joining "sub/page".
    pub fn join(&self, suffix: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(
            suffix
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(ToString::to_string),
        );
        Self { segments }
    }

    pub fn to_rel_string(&self) -> String {
        self.segments.join("/")
    }

    /// Concrete on-disk location under the migration root.
    pub fn fs_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in &self.segments {
            path.push(segment);
        }
        path
    }

    /// The wiki-side URL path for this page: the on-disk `.md` extension is
    /// dropped and a trailing `index` segment collapses into its directory,
    /// mirroring how directory pages were flattened during the crawl.
    pub fn url_path(&self) -> String {
        let mut segments = self.segments.clone();
        if let Some(last) = segments.last_mut() {
            if let Some(stem) = last.strip_suffix(&format!(".{SOURCE_EXTENSION}")) {
                *last = stem.to_string();
            }
        }
        if segments.last().is_some_and(|last| last == "index") {
            segments.pop();
        }
        segments.join("/")
    }
}

impl std::fmt::Display for PagePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_rel_string())
    }
}
