use std::fs;
use std::sync::LazyLock;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::{Captures, Regex};

use crate::config::RunConfig;
use crate::pathing::{FileKind, PagePath, probe};

static ATTACHMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\{\{|\[\[)attachment:(.+?)(\}\}|\]\])").expect("invalid attachment regex")
});

/// One attachment reference found in a line. `name` is alias-stripped and
/// trimmed; `is_media` decides between a plain link and an image embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub name: String,
    pub is_media: bool,
}

/// Pure detection pass: list every attachment token in the line without
/// touching the text or the network.
pub fn find_attachments(line: &str, config: &RunConfig) -> Vec<AttachmentRef> {
    ATTACHMENT_RE
        .captures_iter(line)
        .map(|captures| {
            let name = attachment_name(&captures[2]);
            let is_media = config.is_media(&name);
            AttachmentRef { name, is_media }
        })
        .collect()
}

/// Pure substitution pass: `{{attachment:NAME}}` and `[[attachment:NAME]]`
/// become `[NAME](NAME)`, media-suffixed names get the `!` embed prefix.
pub fn rewrite_attachments(line: &str, config: &RunConfig) -> String {
    ATTACHMENT_RE
        .replace_all(line, |captures: &Captures<'_>| {
            let name = attachment_name(&captures[2]);
            if config.is_media(&name) {
                format!("![{name}]({name})")
            } else {
                format!("[{name}]({name})")
            }
        })
        .into_owned()
}

fn attachment_name(inner: &str) -> String {
    let name = match inner.split_once('|') {
        Some((name, _alias)) => name,
        None => inner,
    };
    name.trim().to_string()
}

/// Downloads attachment bytes for a page. Implemented over HTTP by the
/// crawler's `MoinClient`; tests substitute a fake.
pub trait AttachmentFetcher {
    fn fetch(&mut self, page_url_path: &str, name: &str) -> Result<Vec<u8>>;
}

/// Side-effecting download step, separated from detection and substitution.
///
/// The destination is probed before any request goes out, so a tree that
/// already holds the attachment causes zero fetch calls. A failed fetch is a
/// warning, not an abort: the run sleeps for the configured failure backoff
/// and moves on, and the reference text is rewritten either way. Only a
/// failed *write* of received bytes is fatal.
pub fn download_attachments<F: AttachmentFetcher>(
    refs: &[AttachmentRef],
    current_page: &PagePath,
    config: &RunConfig,
    fetcher: &mut F,
    warnings: &mut Vec<String>,
) -> Result<usize> {
    let page_dir = current_page.parent();
    let url_path = current_page.url_path();
    let mut fetched = 0usize;

    for reference in refs {
        let destination = page_dir.join(&reference.name).fs_path(&config.root_dir);
        if probe(&destination) == FileKind::File {
            continue;
        }
        match fetcher.fetch(&url_path, &reference.name) {
            Ok(bytes) => {
                fs::write(&destination, bytes).with_context(|| {
                    format!("failed to write attachment {}", destination.display())
                })?;
                fetched += 1;
            }
            Err(error) => {
                warnings.push(format!(
                    "failed to fetch attachment \"{}\" for page {current_page}: {error:#}",
                    reference.name
                ));
                sleep(Duration::from_millis(config.failure_backoff_ms));
            }
        }
    }
    Ok(fetched)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Instant;

    use tempfile::tempdir;

    use super::*;

    fn test_config(root: &Path) -> RunConfig {
        RunConfig {
            root_dir: root.to_path_buf(),
            wiki_url: "https://wiki.example.org".to_string(),
            wiki_name: "wiki".to_string(),
            index_page: "TitelIndex".to_string(),
            session_cookie_name: "MOIN_SESSION".to_string(),
            session_cookie_value: String::new(),
            media_extensions: crate::config::DEFAULT_MEDIA_EXTENSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            page_interval_ms: 0,
            attachment_interval_ms: 0,
            failure_backoff_ms: 0,
            timeout_ms: 1_000,
            max_retries: 0,
        }
    }

    #[derive(Default)]
    struct RecordingFetcher {
        calls: Vec<(String, String)>,
        fail: bool,
    }

    impl AttachmentFetcher for RecordingFetcher {
        fn fetch(&mut self, page_url_path: &str, name: &str) -> Result<Vec<u8>> {
            self.calls.push((page_url_path.to_string(), name.to_string()));
            if self.fail {
                anyhow::bail!("HTTP 404");
            }
            Ok(b"bytes".to_vec())
        }
    }

    #[test]
    fn detection_finds_both_token_forms() {
        let temp = tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let refs = find_attachments(
            "{{attachment:photo.JPG}} and [[attachment:notes.txt|alias]]",
            &config,
        );
        assert_eq!(
            refs,
            vec![
                AttachmentRef {
                    name: "photo.JPG".to_string(),
                    is_media: true,
                },
                AttachmentRef {
                    name: "notes.txt".to_string(),
                    is_media: false,
                },
            ]
        );
    }

    #[test]
    fn rewrite_is_a_pure_string_transform() {
        let temp = tempdir().expect("tempdir");
        let config = test_config(temp.path());
        assert_eq!(
            rewrite_attachments("see {{attachment:diagram.png}}", &config),
            "see ![diagram.png](diagram.png)"
        );
        assert_eq!(
            rewrite_attachments("see [[attachment:notes.txt|the notes]]", &config),
            "see [notes.txt](notes.txt)"
        );
    }

    #[test]
    fn download_writes_bytes_next_to_the_page() {
        let temp = tempdir().expect("tempdir");
        let config = test_config(temp.path());
        fs::create_dir_all(temp.path().join("dir")).expect("create dir");

        let page = PagePath::new("dir/page.md");
        let refs = find_attachments("{{attachment:a.png}}", &config);
        let mut fetcher = RecordingFetcher::default();
        let mut warnings = Vec::new();
        let fetched = download_attachments(&refs, &page, &config, &mut fetcher, &mut warnings)
            .expect("download");

        assert_eq!(fetched, 1);
        assert_eq!(fetcher.calls, vec![("dir/page".to_string(), "a.png".to_string())]);
        assert_eq!(
            fs::read(temp.path().join("dir/a.png")).expect("read attachment"),
            b"bytes"
        );
        assert!(warnings.is_empty());
    }

    #[test]
    fn existing_destination_skips_the_fetch() {
        let temp = tempdir().expect("tempdir");
        let config = test_config(temp.path());
        fs::create_dir_all(temp.path().join("dir")).expect("create dir");
        fs::write(temp.path().join("dir/a.png"), b"original").expect("write attachment");

        let page = PagePath::new("dir/page.md");
        let refs = find_attachments("{{attachment:a.png}}", &config);
        let mut fetcher = RecordingFetcher::default();
        let mut warnings = Vec::new();
        let fetched = download_attachments(&refs, &page, &config, &mut fetcher, &mut warnings)
            .expect("download");

        assert_eq!(fetched, 0);
        assert!(fetcher.calls.is_empty());
        assert_eq!(
            fs::read(temp.path().join("dir/a.png")).expect("read attachment"),
            b"original"
        );
    }

    #[test]
    fn failed_fetch_is_a_warning_not_an_abort() {
        let temp = tempdir().expect("tempdir");
        let config = test_config(temp.path());
        let page = PagePath::new("page.md");
        let refs = find_attachments("{{attachment:gone.png}}", &config);
        let mut fetcher = RecordingFetcher {
            fail: true,
            ..RecordingFetcher::default()
        };
        let mut warnings = Vec::new();
        let fetched = download_attachments(&refs, &page, &config, &mut fetcher, &mut warnings)
            .expect("download");

        assert_eq!(fetched, 0);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("gone.png"));
    }

    #[test]
    fn failed_fetch_backs_off_before_continuing() {
        let temp = tempdir().expect("tempdir");
        let mut config = test_config(temp.path());
        config.failure_backoff_ms = 40;

        let page = PagePath::new("page.md");
        let refs = find_attachments("{{attachment:gone.png}}", &config);
        let mut fetcher = RecordingFetcher {
            fail: true,
            ..RecordingFetcher::default()
        };
        let mut warnings = Vec::new();
        let started = Instant::now();
        download_attachments(&refs, &page, &config, &mut fetcher, &mut warnings)
            .expect("download");

        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn url_path_for_index_page_is_its_directory() {
        let temp = tempdir().expect("tempdir");
        let config = test_config(temp.path());
        fs::create_dir_all(temp.path().join("dir")).expect("create dir");

        let page = PagePath::new("dir/index.md");
        let refs = find_attachments("{{attachment:a.txt}}", &config);
        let mut fetcher = RecordingFetcher::default();
        let mut warnings = Vec::new();
        download_attachments(&refs, &page, &config, &mut fetcher, &mut warnings)
            .expect("download");
        assert_eq!(fetcher.calls, vec![("dir".to_string(), "a.txt".to_string())]);
    }
}
