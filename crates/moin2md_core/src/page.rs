use std::fs;

use anyhow::{Context, Result};
use serde::Serialize;
use walkdir::WalkDir;

use crate::attachments::{
    AttachmentFetcher, download_attachments, find_attachments, rewrite_attachments,
};
use crate::config::RunConfig;
use crate::links::rewrite_links;
use crate::pathing::{PagePath, SOURCE_EXTENSION};
use crate::resolve::LinkResolver;
use crate::translate::{
    InlineRewriter, LineAction, TranslatedLine, TranslationState, translate_line,
};

#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub page: String,
    pub lines_in: usize,
    pub lines_out: usize,
    pub attachments_fetched: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TranslateReport {
    pub pages_translated: usize,
    pub attachments_fetched: usize,
    pub warnings: Vec<String>,
    pub pages: Vec<PageReport>,
}

struct PageRewriter<'a, F: AttachmentFetcher> {
    config: &'a RunConfig,
    resolver: &'a LinkResolver,
    fetcher: &'a mut F,
    page: &'a PagePath,
    warnings: Vec<String>,
    attachments_fetched: usize,
}

impl<F: AttachmentFetcher> InlineRewriter for PageRewriter<'_, F> {
    fn rewrite_links(&mut self, line: &str) -> String {
        rewrite_links(line, self.page, self.resolver, &mut self.warnings)
    }

    fn rewrite_attachments(&mut self, line: &str) -> Result<String> {
        let references = find_attachments(line, self.config);
        if !references.is_empty() {
            self.attachments_fetched += download_attachments(
                &references,
                self.page,
                self.config,
                self.fetcher,
                &mut self.warnings,
            )?;
        }
        Ok(rewrite_attachments(line, self.config))
    }
}

/// Single top-to-bottom pass over a page's lines. Output is only assembled
/// afterwards by `render_lines`, because the table separator position and
/// the discarded leading comments are only known per line once the whole
/// pass has annotated them.
pub fn translate_lines<F: AttachmentFetcher>(
    lines: &[&str],
    page: &PagePath,
    config: &RunConfig,
    resolver: &LinkResolver,
    fetcher: &mut F,
) -> Result<(Vec<TranslatedLine>, PageReport)> {
    let mut rewriter = PageRewriter {
        config,
        resolver,
        fetcher,
        page,
        warnings: Vec::new(),
        attachments_fetched: 0,
    };
    let mut state = TranslationState::default();
    let mut translated = Vec::with_capacity(lines.len());
    for line in lines {
        translated.push(translate_line(line, &mut state, &mut rewriter)?);
    }

    let lines_out = translated
        .iter()
        .filter(|line| line.action != LineAction::Discard)
        .count();
    let report = PageReport {
        page: page.to_rel_string(),
        lines_in: lines.len(),
        lines_out,
        attachments_fetched: rewriter.attachments_fetched,
        warnings: rewriter.warnings,
    };
    Ok((translated, report))
}

/// Write-time assembly: discarded lines are omitted; the first row of each
/// table run is preceded by a blank line and followed by its synthesized
/// `|---` separator so the block renders as a Markdown table.
pub fn render_lines(lines: &[TranslatedLine]) -> String {
    let mut output = String::new();
    for line in lines {
        match line.action {
            LineAction::Discard => {}
            LineAction::Keep => {
                output.push_str(&line.text);
                output.push('\n');
            }
            LineAction::TableStart(columns) => {
                output.push('\n');
                output.push_str(&line.text);
                output.push('\n');
                output.push_str(&table_separator(columns));
                output.push('\n');
            }
        }
    }
    output
}

fn table_separator(columns: usize) -> String {
    format!("{}|", "|---".repeat(columns))
}

/// Read, translate, and write back one page. Any read or write failure is
/// fatal to the run; resolution and fetch problems end up in the report's
/// warnings instead.
pub fn translate_file<F: AttachmentFetcher>(
    page: &PagePath,
    config: &RunConfig,
    resolver: &LinkResolver,
    fetcher: &mut F,
) -> Result<PageReport> {
    let path = page.fs_path(&config.root_dir);
    let content =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let lines = content.lines().collect::<Vec<_>>();

    let (translated, report) = translate_lines(&lines, page, config, resolver, fetcher)?;
    let rendered = render_lines(&translated);
    fs::write(&path, rendered).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(report)
}

/// Translate every `.md` page under the migration root, one page at a time
/// in path order. Links resolve against whatever earlier pages have already
/// written; forward references degrade to warnings.
pub fn translate_tree<F: AttachmentFetcher>(
    config: &RunConfig,
    fetcher: &mut F,
) -> Result<TranslateReport> {
    let resolver = LinkResolver::new(&config.root_dir);
    let mut report = TranslateReport::default();

    for entry in WalkDir::new(&config.root_dir).sort_by_file_name() {
        let entry = entry.context("failed to walk migration root")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.components().any(|c| c.as_os_str() == ".git") {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some(SOURCE_EXTENSION) {
            continue;
        }
        let relative = path
            .strip_prefix(&config.root_dir)
            .context("walked entry escapes migration root")?;
        let page = PagePath::new(&relative.to_string_lossy().replace('\\', "/"));

        let page_report = translate_file(&page, config, &resolver, fetcher)?;
        report.pages_translated += 1;
        report.attachments_fetched += page_report.attachments_fetched;
        report
            .warnings
            .extend(page_report.warnings.iter().cloned());
        report.pages.push(page_report);
    }
    Ok(report)
}
