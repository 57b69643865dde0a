use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::pathing::PagePath;
use crate::resolve::LinkResolver;

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("invalid link regex"));

/// Rewrite every `[[...]]` span in a line to Markdown link syntax.
///
/// A pipe splits target from display name; display defaults to the target.
/// Attachment tokens are passed through with brackets preserved so the
/// attachment rule can process them later in the pipeline. External targets
/// (containing a URL scheme separator) are emitted unchanged. Internal
/// targets go through the resolver; an unresolved target is still rewritten
/// with its raw text and records a warning, so a page never aborts on a
/// forward reference.
pub fn rewrite_links(
    line: &str,
    current_page: &PagePath,
    resolver: &LinkResolver,
    warnings: &mut Vec<String>,
) -> String {
    LINK_RE
        .replace_all(line, |captures: &Captures<'_>| {
            rewrite_one(&captures[1], current_page, resolver, warnings)
        })
        .into_owned()
}

fn rewrite_one(
    inner: &str,
    current_page: &PagePath,
    resolver: &LinkResolver,
    warnings: &mut Vec<String>,
) -> String {
    let (target, display) = match inner.split_once('|') {
        Some((target, display)) => (target.trim(), display.trim()),
        None => (inner, inner),
    };

    if target.contains("attachment:") {
        return format!("[[{inner}]]");
    }

    if !target.starts_with('/') && target.contains("://") {
        return format!("[{display}]({target})");
    }

    let resolution = resolver.resolve(current_page, target);
    if !resolution.resolved {
        warnings.push(format!(
            "could not resolve link \"{target}\" from page {current_page}"
        ));
    }
    format!("[{display}]({})", resolution.path)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn setup() -> (tempfile::TempDir, LinkResolver, PagePath) {
        let temp = tempdir().expect("tempdir");
        let resolver = LinkResolver::new(temp.path());
        let page = PagePath::new("dir/page.md");
        (temp, resolver, page)
    }

    #[test]
    fn alias_splits_target_and_display() {
        let (temp, resolver, page) = setup();
        fs::write(temp.path().join("Other.md"), "x").expect("write page");

        let mut warnings = Vec::new();
        let out = rewrite_links("see [[Other| the other page ]]", &page, &resolver, &mut warnings);
        assert_eq!(out, "see [the other page](Other)");
        assert!(warnings.is_empty());
    }

    #[test]
    fn display_defaults_to_target() {
        let (temp, resolver, page) = setup();
        fs::write(temp.path().join("Other.md"), "x").expect("write page");

        let mut warnings = Vec::new();
        let out = rewrite_links("[[Other]]", &page, &resolver, &mut warnings);
        assert_eq!(out, "[Other](Other)");
    }

    #[test]
    fn external_urls_pass_through_unresolved() {
        let (_temp, resolver, page) = setup();
        let mut warnings = Vec::new();
        let out = rewrite_links(
            "[[https://example.org/a|example]]",
            &page,
            &resolver,
            &mut warnings,
        );
        assert_eq!(out, "[example](https://example.org/a)");
        assert!(warnings.is_empty());
    }

    #[test]
    fn attachment_tokens_are_preserved_for_the_attachment_rule() {
        let (_temp, resolver, page) = setup();
        let mut warnings = Vec::new();
        let out = rewrite_links(
            "[[attachment:plan.pdf|the plan]]",
            &page,
            &resolver,
            &mut warnings,
        );
        assert_eq!(out, "[[attachment:plan.pdf|the plan]]");
        assert!(warnings.is_empty());
    }

    #[test]
    fn unresolved_link_degrades_with_warning() {
        let (_temp, resolver, page) = setup();
        let mut warnings = Vec::new();
        let out = rewrite_links("[[Missing]]", &page, &resolver, &mut warnings);
        assert_eq!(out, "[Missing](Missing)");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Missing"));
        assert!(warnings[0].contains("dir/page.md"));
    }

    #[test]
    fn multiple_links_on_one_line() {
        let (temp, resolver, page) = setup();
        fs::create_dir_all(temp.path().join("teams")).expect("create dir");
        let mut warnings = Vec::new();
        let out = rewrite_links("[[teams]] and [[gone]]", &page, &resolver, &mut warnings);
        assert_eq!(out, "[teams](teams/index) and [gone](gone)");
        assert_eq!(warnings.len(), 1);
    }
}
