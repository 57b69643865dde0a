use std::sync::LazyLock;

use regex::Regex;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(=+) (.+) =+").expect("invalid heading regex"));
static CODE_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\{\{\{(?:#!highlight (.+))?$").expect("invalid fence regex"));
static CODE_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\}\}\}\s*$").expect("invalid fence regex"));
static TABLE_CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\|\|(?:<.+?>)?([^|\n]*)").expect("invalid table regex"));
static INLINE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\{(.+?)\}\}\}").expect("invalid inline code regex"));
static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'''\s*([^']+?)\s*'''").expect("invalid bold regex"));
static ITALIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"''\s*([^']+?)\s*''").expect("invalid italic regex"));
static STRIKETHROUGH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--\(\s*([^']+?)\s*\)--").expect("invalid strikethrough regex"));

/// Per-page translation state, threaded through the single top-to-bottom
/// pass. `leading_comments` is true only while the page is still in its
/// opening block of `#` comment lines; `in_table_run` spans a contiguous run
/// of table rows; `list_base_indent` is the `*` column of the bullet that
/// started the current run.
#[derive(Debug, Clone)]
pub struct TranslationState {
    pub in_code_block: bool,
    pub leading_comments: bool,
    pub in_table_run: bool,
    pub list_base_indent: Option<usize>,
}

impl Default for TranslationState {
    fn default() -> Self {
        Self {
            in_code_block: false,
            leading_comments: true,
            in_table_run: false,
            list_base_indent: None,
        }
    }
}

/// Write-time annotation carried beside each translated line instead of an
/// in-band sentinel, so page text containing the literal marker strings can
/// never be misinterpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAction {
    Keep,
    /// Leading comment line, omitted from output entirely.
    Discard,
    /// First row of a table run; a `|---` separator with this many columns is
    /// synthesized after it at write time.
    TableStart(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedLine {
    pub text: String,
    pub action: LineAction,
}

impl TranslatedLine {
    fn keep(text: String) -> Self {
        Self {
            text,
            action: LineAction::Keep,
        }
    }
}

/// Link and attachment rewriting sit mid-pipeline but need the resolver and
/// the fetcher, so the orchestrator injects them behind this seam;
/// everything else in the pipeline is a pure string transform.
pub trait InlineRewriter {
    fn rewrite_links(&mut self, line: &str) -> String;
    /// May perform downloads; a failed write of received bytes is fatal.
    fn rewrite_attachments(&mut self, line: &str) -> anyhow::Result<String>;
}

/// Apply the ordered rule set to one line.
///
/// Rule order: leading-comment suppression, code fences, table rows (both
/// short-circuit the rest of the pipeline), symbol substitution, headings,
/// links, inline code, attachments, list re-indentation, emphasis.
pub fn translate_line<R: InlineRewriter>(
    line: &str,
    state: &mut TranslationState,
    rewriter: &mut R,
) -> anyhow::Result<TranslatedLine> {
    if state.leading_comments {
        if line.starts_with('#') {
            return Ok(TranslatedLine {
                text: String::new(),
                action: LineAction::Discard,
            });
        }
        state.leading_comments = false;
    }

    if state.in_code_block {
        if CODE_CLOSE_RE.is_match(line) {
            state.in_code_block = false;
            return Ok(TranslatedLine::keep("```".to_string()));
        }
        return Ok(TranslatedLine::keep(line.to_string()));
    }
    if let Some(captures) = CODE_OPEN_RE.captures(line) {
        state.in_code_block = true;
        // A fence is not a bullet or a table row; both runs end here.
        state.in_table_run = false;
        state.list_base_indent = None;
        let language = captures.get(1).map_or("", |m| m.as_str());
        return Ok(TranslatedLine::keep(format!("```{language}")));
    }

    if let Some(row) = rewrite_table_row(line) {
        let action = if state.in_table_run {
            LineAction::Keep
        } else {
            LineAction::TableStart(row.columns)
        };
        state.in_table_run = true;
        state.list_base_indent = None;
        return Ok(TranslatedLine {
            text: row.text,
            action,
        });
    }
    state.in_table_run = false;

    let mut text = substitute_symbols(line);

    let heading = HEADING_RE
        .captures(&text)
        .map(|captures| format!("{} {}", "#".repeat(captures[1].len()), &captures[2]));
    if let Some(heading) = heading {
        text = heading;
    }

    text = rewriter.rewrite_links(&text);
    text = INLINE_CODE_RE.replace_all(&text, "`$1`").into_owned();
    text = rewriter.rewrite_attachments(&text)?;
    text = reindent_bullet(&text, state);
    text = rewrite_emphasis(&text);

    Ok(TranslatedLine::keep(text))
}

struct TableRow {
    text: String,
    columns: usize,
}

/// A table row is one or more `||` cell markers, each optionally carrying a
/// `<...>` style annotation. Every marker becomes a single leading pipe;
/// trailing pipes collapse to exactly one. The column count excludes the
/// trailing empty marker of a well-formed `||a||b||` row.
fn rewrite_table_row(line: &str) -> Option<TableRow> {
    let markers = TABLE_CELL_RE.find_iter(line).count();
    if markers == 0 {
        return None;
    }
    let rewritten = TABLE_CELL_RE.replace_all(line, "|$1");
    let text = format!("{}|", rewritten.trim_end_matches('|'));
    Some(TableRow {
        text,
        columns: markers.saturating_sub(1),
    })
}

/// Two fixed wiki glyphs, replaced unconditionally.
fn substitute_symbols(line: &str) -> String {
    line.replace("(./)", "✓").replace("{X}", "✗")
}

/// Re-indent a bullet to two spaces per column of offset from the run's base
/// `*` column. A non-bullet line ends the run.
fn reindent_bullet(line: &str, state: &mut TranslationState) -> String {
    if !line.trim().starts_with("* ") {
        state.list_base_indent = None;
        return line.to_string();
    }
    let column = line.find('*').unwrap_or(0);
    let base = *state.list_base_indent.get_or_insert(column);
    let indent = 2 * column.saturating_sub(base);
    let text = line.trim_start_matches(['*', ' ']);
    format!("{}* {}", " ".repeat(indent), text)
}

/// Bold before italic so `'''` runs are never half-eaten by the `''` rule.
fn rewrite_emphasis(line: &str) -> String {
    let bold = BOLD_RE.replace_all(line, "**$1**");
    let italic = ITALIC_RE.replace_all(&bold, "*$1*");
    STRIKETHROUGH_RE
        .replace_all(&italic, "~~$1~~")
        .into_owned()
}
