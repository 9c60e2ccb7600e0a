//! Blocks back to markup.
//!
//! Emits the canonical form of the markup subset: blocks separated by a blank
//! line, inline markers as tags, fenced code as `<pre><code>`, adjacent list
//! items of the same kind merged into one list.

use bridge_traits::target::Block;

use crate::entities::escape;
use crate::inline::{parse_inline, Inline};
use crate::language::PLAIN_TEXT;

pub fn render_blocks(blocks: &[Block]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut iter = blocks.iter().peekable();

    while let Some(block) = iter.next() {
        match block {
            Block::Paragraph { text } => {
                if !text.trim().is_empty() {
                    parts.push(render_inline(text));
                }
            }
            Block::Code { text, language } => parts.push(render_code(text, language)),
            Block::ListItem { text, ordered } => {
                let tag = if *ordered { "ol" } else { "ul" };
                let mut list = format!("<{}><li>{}</li>", tag, render_inline(text));

                while let Some(Block::ListItem {
                    text,
                    ordered: next_ordered,
                }) = iter.peek()
                {
                    if next_ordered != ordered {
                        break;
                    }
                    list.push_str(&format!("<li>{}</li>", render_inline(text)));
                    iter.next();
                }

                list.push_str(&format!("</{}>", tag));
                parts.push(list);
            }
        }
    }

    parts.join("\n\n")
}

fn render_code(text: &str, language: &str) -> String {
    if language == PLAIN_TEXT || language.is_empty() {
        format!("<pre><code>{}</code></pre>", escape(text))
    } else {
        format!(
            "<pre><code class=\"language-{}\">{}</code></pre>",
            language,
            escape(text)
        )
    }
}

/// Render paragraph text, turning inline markers back into tags.
///
/// Unpaired markers are emitted literally and escaped marker characters lose
/// their backslash.
pub fn render_inline(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    render_nodes(&parse_inline(text), &mut out);
    out
}

fn render_nodes(nodes: &[Inline], out: &mut String) {
    for node in nodes {
        match node {
            Inline::Text(text) => {
                for (i, line) in text.split('\n').enumerate() {
                    if i > 0 {
                        out.push_str("<br>");
                    }
                    out.push_str(&escape(line));
                }
            }
            Inline::Code(text) => {
                out.push_str("<code>");
                out.push_str(&escape(text));
                out.push_str("</code>");
            }
            Inline::Bold(children) => wrap("strong", children, out),
            Inline::Italic(children) => wrap("em", children, out),
            Inline::Strikethrough(children) => wrap("del", children, out),
        }
    }
}

fn wrap(tag: &str, children: &[Inline], out: &mut String) {
    out.push_str(&format!("<{}>", tag));
    render_nodes(children, out);
    out.push_str(&format!("</{}>", tag));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_markers_become_tags() {
        assert_eq!(
            render_inline("**b** _i_ ~~s~~ `a < b`"),
            "<strong>b</strong> <em>i</em> <del>s</del> <code>a &lt; b</code>"
        );
    }

    #[test]
    fn test_nested_markers() {
        assert_eq!(
            render_inline("**bold _and italic_**"),
            "<strong>bold <em>and italic</em></strong>"
        );
    }

    #[test]
    fn test_escaped_underscores_are_text() {
        assert_eq!(render_inline(r"snake\_case\_name"), "snake_case_name");
        assert_eq!(render_inline(r"`\_x\_`"), "<code>_x_</code>");
    }

    #[test]
    fn test_intraword_emphasis() {
        assert_eq!(render_inline("a_b_c"), "a<em>b</em>c");
    }

    #[test]
    fn test_unpaired_markers_are_literal() {
        assert_eq!(render_inline("2 ** 3 and ~~"), "2 ** 3 and ~~");
    }

    #[test]
    fn test_line_breaks_and_escaping() {
        assert_eq!(render_inline("a & b\nc"), "a &amp; b<br>c");
    }

    #[test]
    fn test_adjacent_list_items_merge_by_kind() {
        let blocks = vec![
            Block::list_item("a", false),
            Block::list_item("b", false),
            Block::list_item("one", true),
            Block::paragraph("after"),
        ];

        assert_eq!(
            render_blocks(&blocks),
            "<ul><li>a</li><li>b</li></ul>\n\n<ol><li>one</li></ol>\n\nafter"
        );
    }

    #[test]
    fn test_code_block_rendering() {
        assert_eq!(
            render_blocks(&[Block::code("x < 1", "python")]),
            "<pre><code class=\"language-python\">x &lt; 1</code></pre>"
        );
        assert_eq!(
            render_blocks(&[Block::code("raw", PLAIN_TEXT)]),
            "<pre><code>raw</code></pre>"
        );
    }
}
