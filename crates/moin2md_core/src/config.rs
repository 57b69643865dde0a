use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub const DEFAULT_INDEX_PAGE: &str = "TitelIndex";
pub const DEFAULT_SESSION_COOKIE_NAME: &str = "MOIN_SESSION";
pub const DEFAULT_PAGE_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_ATTACHMENT_INTERVAL_MS: u64 = 13_000;
pub const DEFAULT_FAILURE_BACKOFF_MS: u64 = 10_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: usize = 2;

/// Attachment suffixes rendered as image/video embeds rather than plain links.
pub const DEFAULT_MEDIA_EXTENSIONS: &[&str] = &[
    ".mp4", ".m4v", ".mov", ".webm", ".ogv", ".png", ".jpg", ".jpeg", ".gif", ".bmp",
];

/// Fully resolved configuration for one migration run. Everything the
/// translator and crawler need travels through this value; nothing is read
/// from process globals past this point.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Local directory holding the migrated tree.
    pub root_dir: PathBuf,
    /// Wiki base URL without a trailing slash. May be empty for purely
    /// local translation; building a `MoinClient` then fails.
    pub wiki_url: String,
    /// Path segment of the wiki on the server, e.g. "carolo-cup". May be
    /// empty under the same condition as `wiki_url`.
    pub wiki_name: String,
    /// Title-index page listing every page of the wiki.
    pub index_page: String,
    pub session_cookie_name: String,
    pub session_cookie_value: String,
    pub media_extensions: Vec<String>,
    pub page_interval_ms: u64,
    pub attachment_interval_ms: u64,
    pub failure_backoff_ms: u64,
    pub timeout_ms: u64,
    pub max_retries: usize,
}

impl RunConfig {
    pub fn is_media(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        self.media_extensions
            .iter()
            .any(|suffix| lowered.ends_with(&suffix.to_lowercase()))
    }
}

/// CLI flag values; a `Some` here beats both env and config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub root_dir: Option<PathBuf>,
    pub wiki_url: Option<String>,
    pub wiki_name: Option<String>,
    pub session_cookie_value: Option<String>,
    pub session_cookie_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    wiki: WikiSection,
    #[serde(default)]
    migration: MigrationSection,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct WikiSection {
    url: Option<String>,
    name: Option<String>,
    index_page: Option<String>,
    session_cookie_name: Option<String>,
    session_cookie: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct MigrationSection {
    root_dir: Option<PathBuf>,
    media_extensions: Option<Vec<String>>,
    page_interval_ms: Option<u64>,
    attachment_interval_ms: Option<u64>,
    failure_backoff_ms: Option<u64>,
    timeout_ms: Option<u64>,
    max_retries: Option<usize>,
}

pub const DEFAULT_CONFIG_FILENAME: &str = "moin2md.toml";

pub fn load_run_config(overrides: &ConfigOverrides) -> Result<RunConfig> {
    load_run_config_with_lookup(overrides, |key| env::var(key).ok())
}

fn load_run_config_with_lookup<F>(overrides: &ConfigOverrides, lookup_env: F) -> Result<RunConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let config_path = overrides
        .config_path
        .clone()
        .or_else(|| non_empty(lookup_env("MOIN_CONFIG")).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    let file = load_config_file(&config_path)?;

    let wiki_url = overrides
        .wiki_url
        .clone()
        .or_else(|| non_empty(lookup_env("MOIN_URL")))
        .or(file.wiki.url)
        .unwrap_or_default();
    let wiki_url = wiki_url.trim_end_matches('/').to_string();

    let wiki_name = overrides
        .wiki_name
        .clone()
        .or_else(|| non_empty(lookup_env("MOIN_WIKI_NAME")))
        .or(file.wiki.name)
        .unwrap_or_default();

    let root_dir = overrides
        .root_dir
        .clone()
        .or_else(|| non_empty(lookup_env("MOIN_ROOT")).map(PathBuf::from))
        .or(file.migration.root_dir)
        .or_else(|| non_empty(Some(wiki_name.clone())).map(PathBuf::from));
    let Some(root_dir) = root_dir else {
        bail!(
            "migration root is not configured (pass --root, set MOIN_ROOT, add [migration] root_dir to {}, or configure the wiki name it defaults to)",
            config_path.display()
        );
    };

    let session_cookie_name = overrides
        .session_cookie_name
        .clone()
        .or_else(|| non_empty(lookup_env("MOIN_SESSION_COOKIE_NAME")))
        .or(file.wiki.session_cookie_name)
        .unwrap_or_else(|| DEFAULT_SESSION_COOKIE_NAME.to_string());
    let session_cookie_value = overrides
        .session_cookie_value
        .clone()
        .or_else(|| non_empty(lookup_env("MOIN_SESSION_COOKIE")))
        .or(file.wiki.session_cookie)
        .unwrap_or_default();

    let media_extensions = file.migration.media_extensions.unwrap_or_else(|| {
        DEFAULT_MEDIA_EXTENSIONS
            .iter()
            .map(ToString::to_string)
            .collect()
    });

    Ok(RunConfig {
        root_dir,
        wiki_url,
        wiki_name,
        index_page: file
            .wiki
            .index_page
            .unwrap_or_else(|| DEFAULT_INDEX_PAGE.to_string()),
        session_cookie_name,
        session_cookie_value,
        media_extensions,
        page_interval_ms: env_or(
            &lookup_env,
            "MOIN_PAGE_INTERVAL_MS",
            file.migration.page_interval_ms,
            DEFAULT_PAGE_INTERVAL_MS,
        ),
        attachment_interval_ms: env_or(
            &lookup_env,
            "MOIN_ATTACHMENT_INTERVAL_MS",
            file.migration.attachment_interval_ms,
            DEFAULT_ATTACHMENT_INTERVAL_MS,
        ),
        failure_backoff_ms: env_or(
            &lookup_env,
            "MOIN_FAILURE_BACKOFF_MS",
            file.migration.failure_backoff_ms,
            DEFAULT_FAILURE_BACKOFF_MS,
        ),
        timeout_ms: env_or(
            &lookup_env,
            "MOIN_HTTP_TIMEOUT_MS",
            file.migration.timeout_ms,
            DEFAULT_TIMEOUT_MS,
        ),
        max_retries: file.migration.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
    })
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or<F>(lookup_env: &F, key: &str, file_value: Option<u64>, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup_env(key)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .or(file_value)
        .unwrap_or(default)
}
