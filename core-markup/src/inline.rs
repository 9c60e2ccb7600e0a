//! Inline styling inside paragraph and list text.
//!
//! Block text carries styled spans between markers: `**bold**`, `_italic_`,
//! `~~strike~~` and `` `code` ``. Literal marker characters are escaped with
//! a backslash, so a marker is never confused with text the user wrote:
//! `2\*\*3` is plain text while `2**3**` is a bold `3`. Markers bind without
//! regard to word boundaries, which is what lets `a_b_c` carry an italic `b`.
//!
//! [`escape_text`] produces the escaped form, [`parse_inline`] reads it back
//! as a tree, and [`styled_runs`] / [`write_runs`] convert between marker text
//! and flat runs with uniform styling.

/// Characters with a meaning inside block text.
pub const MARKER_CHARS: [char; 5] = ['*', '_', '~', '`', '\\'];

/// One node of parsed inline text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Code(String),
    Bold(Vec<Inline>),
    Italic(Vec<Inline>),
    Strikethrough(Vec<Inline>),
}

/// Styling applied to a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Style {
    pub bold: bool,
    pub italic: bool,
    pub strikethrough: bool,
    pub code: bool,
}

/// Text with uniform styling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledRun {
    pub text: String,
    pub style: Style,
}

impl StyledRun {
    pub fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, Style::default())
    }
}

/// Escape every marker character in literal text.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if MARKER_CHARS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Parse marker text into an inline tree.
///
/// A marker without a partner stays literal, as does a pair with nothing
/// between them. A backslash only escapes a marker character.
pub fn parse_inline(text: &str) -> Vec<Inline> {
    parse(&pieces(text))
}

/// Marker text as flat runs; adjacent runs with the same style are merged.
pub fn styled_runs(text: &str) -> Vec<StyledRun> {
    let mut runs = Vec::new();
    flatten(&parse_inline(text), Style::default(), &mut runs);
    merge_runs(runs)
}

/// Render runs as marker text, escaping their literal content.
pub fn write_runs(runs: &[StyledRun]) -> String {
    let mut out = String::new();
    for run in merge_runs(runs.to_vec()) {
        let style = run.style;
        let mut text = escape_text(&run.text);
        if style.code {
            text = format!("`{}`", text);
        }
        if style.italic {
            text = format!("_{}_", text);
        }
        if style.bold {
            text = format!("**{}**", text);
        }
        if style.strikethrough {
            text = format!("~~{}~~", text);
        }
        out.push_str(&text);
    }
    out
}

/// Merge neighbours that share a style.
pub fn merge_runs(runs: Vec<StyledRun>) -> Vec<StyledRun> {
    let mut merged: Vec<StyledRun> = Vec::with_capacity(runs.len());
    for run in runs {
        if run.text.is_empty() {
            continue;
        }
        match merged.last_mut() {
            Some(last) if last.style == run.style => last.text.push_str(&run.text),
            _ => merged.push(run),
        }
    }
    merged
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece {
    Literal(char),
    Marker(char),
}

impl Piece {
    fn char(self) -> char {
        match self {
            Piece::Literal(c) | Piece::Marker(c) => c,
        }
    }
}

fn pieces(text: &str) -> Vec<Piece> {
    let mut out = Vec::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some(next) if MARKER_CHARS.contains(next) => {
                    out.push(Piece::Literal(*next));
                    chars.next();
                }
                _ => out.push(Piece::Literal('\\')),
            },
            '*' | '_' | '~' | '`' => out.push(Piece::Marker(c)),
            _ => out.push(Piece::Literal(c)),
        }
    }
    out
}

/// Width of the delimiter a marker character starts.
fn delimiter_width(marker: char) -> usize {
    match marker {
        '*' | '~' => 2,
        _ => 1,
    }
}

fn is_delimiter(pieces: &[Piece], at: usize, marker: char, width: usize) -> bool {
    pieces
        .get(at..at + width)
        .is_some_and(|window| window.iter().all(|p| *p == Piece::Marker(marker)))
}

/// Position of the delimiter closing a span whose content starts at `start`.
fn closing_delimiter(pieces: &[Piece], start: usize, marker: char, width: usize) -> Option<usize> {
    (start + 1..pieces.len()).find(|&j| is_delimiter(pieces, j, marker, width))
}

fn parse(pieces: &[Piece]) -> Vec<Inline> {
    let mut nodes = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < pieces.len() {
        if let Piece::Marker(marker) = pieces[i] {
            let width = delimiter_width(marker);
            if is_delimiter(pieces, i, marker, width) {
                if let Some(end) = closing_delimiter(pieces, i + width, marker, width) {
                    if !text.is_empty() {
                        nodes.push(Inline::Text(std::mem::take(&mut text)));
                    }
                    let inner = &pieces[i + width..end];
                    nodes.push(match marker {
                        '`' => Inline::Code(inner.iter().map(|p| p.char()).collect()),
                        '*' => Inline::Bold(parse(inner)),
                        '~' => Inline::Strikethrough(parse(inner)),
                        _ => Inline::Italic(parse(inner)),
                    });
                    i = end + width;
                    continue;
                }
            }
        }

        text.push(pieces[i].char());
        i += 1;
    }

    if !text.is_empty() {
        nodes.push(Inline::Text(text));
    }
    nodes
}

fn flatten(nodes: &[Inline], style: Style, runs: &mut Vec<StyledRun>) {
    for node in nodes {
        match node {
            Inline::Text(text) => runs.push(StyledRun::new(text.clone(), style)),
            Inline::Code(text) => runs.push(StyledRun::new(
                text.clone(),
                Style {
                    code: true,
                    ..style
                },
            )),
            Inline::Bold(children) => flatten(children, Style { bold: true, ..style }, runs),
            Inline::Italic(children) => flatten(
                children,
                Style {
                    italic: true,
                    ..style
                },
                runs,
            ),
            Inline::Strikethrough(children) => flatten(
                children,
                Style {
                    strikethrough: true,
                    ..style
                },
                runs,
            ),
        }
    }
}
