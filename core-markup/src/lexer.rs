//! Two-pass markup lexer.
//!
//! Pass one ([`extract_fences`]) cuts fenced code out of the input into a side
//! table and leaves [`Segment::Code`] placeholders behind, so nothing in pass
//! two can touch code content. Pass two ([`BlockBuilder`]) tokenizes the
//! remaining text into tags and text runs and folds them into blocks.

use bridge_traits::target::Block;

use crate::entities::unescape;
use crate::inline::escape_text;
use crate::language::{language_from_class, normalize_language};

/// Fenced code pulled out of the input in pass one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSegment {
    pub language: &'static str,
    pub content: String,
}

/// Input split around fenced code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    /// Index into the code side table
    Code(usize),
}

// ============================================================================
// Pass one: fences
// ============================================================================

/// Split `input` into text runs and code placeholders.
///
/// Recognizes `<pre><code class="language-x">...</code></pre>` (also `<pre>`
/// alone) and triple-backtick fences with an optional language tag. An
/// unterminated fence is left in the text.
pub fn extract_fences(input: &str) -> (Vec<Segment>, Vec<CodeSegment>) {
    let mut segments = Vec::new();
    let mut table = Vec::new();
    let mut text_start = 0;
    let mut pos = 0;

    while pos < input.len() {
        let rest = &input[pos..];
        let fence = if rest.starts_with("```") {
            backtick_fence(rest)
        } else if starts_with_tag(rest, "pre") {
            html_fence(rest)
        } else {
            None
        };

        match fence {
            Some((code, consumed)) => {
                if text_start < pos {
                    segments.push(Segment::Text(input[text_start..pos].to_string()));
                }
                segments.push(Segment::Code(table.len()));
                table.push(code);
                pos += consumed;
                text_start = pos;
            }
            None => {
                pos += rest.chars().next().map(char::len_utf8).unwrap_or(1);
            }
        }
    }

    if text_start < input.len() {
        segments.push(Segment::Text(input[text_start..].to_string()));
    }

    (segments, table)
}

fn backtick_fence(rest: &str) -> Option<(CodeSegment, usize)> {
    let after = &rest[3..];
    let close = after.find("```")?;
    let body = &after[..close];

    let (tag, content) = match body.find('\n') {
        Some(newline) => (&body[..newline], &body[newline + 1..]),
        None => ("", body),
    };
    let content = content.strip_suffix('\n').unwrap_or(content);
    let tag = tag.split_whitespace().next().unwrap_or("");

    Some((
        CodeSegment {
            language: normalize_language(tag),
            content: code_text(content),
        },
        3 + close + 3,
    ))
}

fn html_fence(rest: &str) -> Option<(CodeSegment, usize)> {
    let pre_open_end = rest.find('>')?;
    let mut pos = pre_open_end + 1;

    let inner = &rest[pos..];
    let leading_ws = inner.len() - inner.trim_start().len();

    if starts_with_tag(&inner[leading_ws..], "code") {
        let code_open = &inner[leading_ws..];
        let code_open_end = code_open.find('>')?;
        let class = attribute(&code_open[..code_open_end], "class").unwrap_or("");
        let language = normalize_language(language_from_class(class).unwrap_or(""));

        pos += leading_ws + code_open_end + 1;
        let close = find_ignore_case(&rest[pos..], "</code>")?;
        let content = code_text(&rest[pos..pos + close]);
        pos += close + "</code>".len();

        let tail = &rest[pos..];
        let tail_ws = tail.len() - tail.trim_start().len();
        if starts_with_ignore_case(&tail[tail_ws..], "</pre>") {
            pos += tail_ws + "</pre>".len();
        }

        Some((CodeSegment { language, content }, pos))
    } else {
        let close = find_ignore_case(inner, "</pre>")?;
        let content = code_text(&inner[..close]);
        pos += close + "</pre>".len();

        Some((
            CodeSegment {
                language: normalize_language(""),
                content,
            },
            pos,
        ))
    }
}

/// Code content as plain text: line-break tags become newlines, entities decoded.
fn code_text(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    for token in tokenize(raw) {
        match token {
            Token::Text(run) => text.push_str(run),
            Token::Tag { ref name, .. } if name == "br" => text.push('\n'),
            Token::Tag { .. } => {}
        }
    }
    unescape(&text)
}

// ============================================================================
// Pass two: tags and text
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Tag { name: String, closing: bool },
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut pos = 0;

    while let Some(offset) = input[pos..].find('<') {
        let lt = pos + offset;
        let rest = &input[lt..];

        let skip = if rest.starts_with("<!--") {
            Some((None, rest.find("-->").map(|end| end + 3).unwrap_or(rest.len())))
        } else {
            parse_tag(rest).map(|(tag, len)| (Some(tag), len))
        };

        match skip {
            Some((tag, len)) => {
                if text_start < lt {
                    tokens.push(Token::Text(&input[text_start..lt]));
                }
                if let Some(tag) = tag {
                    tokens.push(tag);
                }
                pos = lt + len;
                text_start = pos;
            }
            None => pos = lt + 1,
        }
    }

    if text_start < input.len() {
        tokens.push(Token::Text(&input[text_start..]));
    }
    tokens
}

/// Tags the lexer understands or strips. Any other `<word` is text.
const KNOWN_TAGS: &[&str] = &[
    "a", "b", "blockquote", "br", "code", "del", "div", "em", "font", "h1", "h2", "h3", "h4",
    "h5", "h6", "hr", "i", "img", "li", "ol", "p", "pre", "s", "span", "strike", "strong", "sub",
    "sup", "table", "tbody", "td", "th", "thead", "tr", "u", "ul",
];

/// A known tag name followed by `>`, `/` or well-formed attributes.
fn parse_tag(rest: &str) -> Option<(Token<'static>, usize)> {
    let body = &rest[1..];
    let (closing, body) = match body.strip_prefix('/') {
        Some(stripped) => (true, stripped),
        None => (false, body),
    };

    let name_len = body
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(body.len());
    let name = body[..name_len].to_ascii_lowercase();
    if !KNOWN_TAGS.contains(&name.as_str()) {
        return None;
    }

    let after = &body[name_len..];
    let end = after.find('>')?;
    let inner = &after[..end];
    let well_formed = if closing {
        inner.trim().is_empty()
    } else {
        inner.is_empty() || (inner.starts_with(|c: char| c.is_ascii_whitespace() || c == '/')
            && attributes_well_formed(inner))
    };
    if !well_formed {
        return None;
    }

    let consumed = rest.len() - after.len() + end + 1;
    Some((Token::Tag { name, closing }, consumed))
}

/// `name="value"` pairs (any quoting), optionally ending in `/`.
fn attributes_well_formed(attributes: &str) -> bool {
    let mut rest = attributes.trim();

    while !rest.is_empty() {
        if rest == "/" {
            return true;
        }
        let name_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':')))
            .unwrap_or(rest.len());
        if name_len == 0 {
            return false;
        }
        let Some(value) = rest[name_len..].trim_start().strip_prefix('=') else {
            return false;
        };
        let value = value.trim_start();

        rest = match value.chars().next() {
            Some(quote @ ('"' | '\'')) => match value[1..].find(quote) {
                Some(close) => &value[close + 2..],
                None => return false,
            },
            Some(_) => {
                let len = value
                    .find(|c: char| c.is_ascii_whitespace())
                    .unwrap_or(value.len());
                &value[len..]
            }
            None => return false,
        }
        .trim_start();
    }
    true
}

/// Folds text runs, inline tags and list structure into blocks.
#[derive(Debug, Default)]
pub struct BlockBuilder {
    blocks: Vec<Block>,
    text: String,
    lists: Vec<bool>,
    item: Option<String>,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one text segment of markup.
    pub fn push_markup(&mut self, markup: &str) {
        for token in tokenize(markup) {
            match token {
                Token::Text(run) => self.buffer().push_str(&escape_text(&unescape(run))),
                Token::Tag { name, closing } => self.apply_tag(&name, closing),
            }
        }
    }

    /// Append a finished block (code) after flushing pending text.
    pub fn push_block(&mut self, block: Block) {
        self.finish_item();
        self.flush_text();
        self.blocks.push(block);
    }

    pub fn finish(mut self) -> Vec<Block> {
        self.finish_item();
        self.flush_text();
        self.blocks
    }

    fn buffer(&mut self) -> &mut String {
        match self.item {
            Some(ref mut item) => item,
            None => &mut self.text,
        }
    }

    fn apply_tag(&mut self, name: &str, closing: bool) {
        // Inline order: code, bold, italic, strikethrough, then wrapper stripping
        let marker = match name {
            "code" => Some("`"),
            "strong" | "b" => Some("**"),
            "em" | "i" => Some("_"),
            "del" | "s" | "strike" => Some("~~"),
            _ => None,
        };
        if let Some(marker) = marker {
            self.buffer().push_str(marker);
            return;
        }

        match (name, closing) {
            ("br", _) => self.buffer().push('\n'),
            ("p" | "div", _) if self.item.is_none() => self.text.push_str("\n\n"),
            ("ul" | "ol", false) => {
                self.finish_item();
                self.flush_text();
                self.lists.push(name == "ol");
            }
            ("ul" | "ol", true) => {
                self.finish_item();
                self.lists.pop();
            }
            ("li", false) => {
                self.finish_item();
                self.flush_text();
                self.item = Some(String::new());
            }
            ("li", true) => self.finish_item(),
            // span, font and anything else: unwrap to inner text
            _ => {}
        }
    }

    fn finish_item(&mut self) {
        if let Some(item) = self.item.take() {
            let text = item.trim();
            if !text.is_empty() {
                let ordered = self.lists.last().copied().unwrap_or(false);
                self.blocks.push(Block::list_item(text, ordered));
            }
        }
    }

    /// Split buffered text into paragraphs on blank lines; runs of `- ` lines
    /// become unordered list items.
    fn flush_text(&mut self) {
        let text = std::mem::take(&mut self.text);
        let mut paragraph: Vec<&str> = Vec::new();

        for line in text.split('\n') {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                self.push_paragraph(&mut paragraph);
            } else if let Some(item) = line.trim_start().strip_prefix("- ") {
                self.push_paragraph(&mut paragraph);
                let item = item.trim();
                if !item.is_empty() {
                    self.blocks.push(Block::list_item(item, false));
                }
            } else {
                paragraph.push(line);
            }
        }
        self.push_paragraph(&mut paragraph);
    }

    fn push_paragraph(&mut self, lines: &mut Vec<&str>) {
        let joined = lines.join("\n");
        lines.clear();
        let text = joined.trim();
        if !text.is_empty() {
            self.blocks.push(Block::paragraph(text));
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn starts_with_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .get(..needle.len())
        .map(|head| head.eq_ignore_ascii_case(needle))
        .unwrap_or(false)
}

/// `<name` followed by `>` or whitespace.
fn starts_with_tag(haystack: &str, name: &str) -> bool {
    haystack.starts_with('<')
        && starts_with_ignore_case(&haystack[1..], name)
        && haystack[1 + name.len()..]
            .starts_with(|c: char| c == '>' || c.is_ascii_whitespace())
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(&needle.to_ascii_lowercase())
}

fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let start = find_ignore_case(tag, &format!("{}=", name))? + name.len() + 1;
    let value = &tag[start..];
    let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let value = &value[1..];
    let end = value.find(quote)?;
    Some(&value[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(markup: &str) -> Vec<Block> {
        let mut builder = BlockBuilder::new();
        builder.push_markup(markup);
        builder.finish()
    }

    #[test]
    fn test_backtick_fence_is_extracted() {
        let (segments, table) = extract_fences("a ```py\nprint(1)\n``` c");

        assert_eq!(
            segments,
            vec![
                Segment::Text("a ".to_string()),
                Segment::Code(0),
                Segment::Text(" c".to_string()),
            ]
        );
        assert_eq!(table[0].language, "python");
        assert_eq!(table[0].content, "print(1)");
    }

    #[test]
    fn test_html_fence_with_class_is_extracted() {
        let (segments, table) = extract_fences(
            "<PRE><code class=\"hljs language-rust\">let x = a &lt; b;<br>x</code></pre>",
        );

        assert_eq!(segments, vec![Segment::Code(0)]);
        assert_eq!(table[0].language, "rust");
        assert_eq!(table[0].content, "let x = a < b;\nx");
    }

    #[test]
    fn test_code_content_is_not_styled() {
        let (_, table) = extract_fences("<pre><code>**not bold** <b>x</b></code></pre>");
        assert_eq!(table[0].content, "**not bold** x");
        assert_eq!(table[0].language, "plain text");
    }

    #[test]
    fn test_unterminated_fence_stays_text() {
        let (segments, table) = extract_fences("```py\nprint(1)");
        assert!(table.is_empty());
        assert_eq!(segments, vec![Segment::Text("```py\nprint(1)".to_string())]);
    }

    #[test]
    fn test_inline_tags_become_markers() {
        assert_eq!(
            blocks("<strong>b</strong> <em>i</em> <del>s</del> <code>c</code> <span style=\"color:red\">plain</span>"),
            vec![Block::paragraph("**b** _i_ ~~s~~ `c` plain")]
        );
    }

    #[test]
    fn test_paragraph_tags_and_blank_lines_split_paragraphs() {
        assert_eq!(
            blocks("<div>one</div><div>two<br>three</div>\n\nfour"),
            vec![
                Block::paragraph("one"),
                Block::paragraph("two\nthree"),
                Block::paragraph("four"),
            ]
        );
    }

    #[test]
    fn test_html_lists() {
        assert_eq!(
            blocks("<ul><li>a</li><li>b</li></ul><ol><li>first</li></ol>"),
            vec![
                Block::list_item("a", false),
                Block::list_item("b", false),
                Block::list_item("first", true),
            ]
        );
    }

    #[test]
    fn test_dash_lines_are_list_items() {
        assert_eq!(
            blocks("Shopping<br>- eggs<br>- milk"),
            vec![
                Block::paragraph("Shopping"),
                Block::list_item("eggs", false),
                Block::list_item("milk", false),
            ]
        );
    }

    #[test]
    fn test_unknown_tags_are_stripped_and_stray_angle_kept() {
        assert_eq!(
            blocks("<img src=\"x.png\">1 < 2<!-- note -->"),
            vec![Block::paragraph("1 < 2")]
        );
    }

    #[test]
    fn test_angle_text_that_is_not_a_tag_is_kept() {
        assert_eq!(
            blocks("a <b and c> d <vec> e<br/>f"),
            vec![Block::paragraph("a <b and c> d <vec> e\nf")]
        );
    }

    #[test]
    fn test_literal_markers_are_escaped() {
        assert_eq!(
            blocks("call _init_ now, 2**3 and <em>x</em>"),
            vec![Block::paragraph(r"call \_init\_ now, 2\*\*3 and _x_")]
        );
    }
}
