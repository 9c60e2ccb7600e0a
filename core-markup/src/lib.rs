//! # Markup Conversion
//!
//! Bidirectional conversion between note body markup (the HTML subset Anki
//! stores) and the target's block model.
//!
//! ## Overview
//!
//! - [`MarkupConverter::to_blocks`] lexes markup into paragraphs, code blocks
//!   and list items
//! - [`MarkupConverter::to_markup`] renders blocks back to the canonical markup
//!   form
//!
//! Conversion never fails. Styling wrappers (`<span style=...>`) are unwrapped
//! and their style dropped; inline emphasis survives as markers inside
//! paragraph text (`**bold**`, `_italic_`, `~~strike~~`, `` `code` ``).
//! Marker characters the note itself contains are backslash-escaped in block
//! text, so Markdown-looking input such as `2**3` stays literal (see
//! [`inline`]).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_markup::MarkupConverter;
//!
//! let converter = MarkupConverter::new();
//! let blocks = converter.to_blocks("a **b** ```py\nprint(1)\n``` c");
//! assert_eq!(blocks.len(), 3);
//!
//! let markup = converter.to_markup(&blocks);
//! ```

pub mod entities;
pub mod error;
pub mod inline;
pub mod language;
pub mod lexer;
pub mod render;

pub use error::{MarkupError, Result};
pub use language::{normalize_language, PLAIN_TEXT};

use bridge_traits::target::Block;
use tracing::warn;

use lexer::{BlockBuilder, CodeSegment, Segment};

/// Paragraph text emitted in place of a code block that could not be resolved.
pub const CODE_SEGMENT_ERROR_MARKER: &str = "[code block could not be parsed]";

/// Stateless markup/block translator.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupConverter;

impl MarkupConverter {
    pub fn new() -> Self {
        Self
    }

    /// Convert markup into blocks.
    pub fn to_blocks(&self, markup: &str) -> Vec<Block> {
        let (segments, table) = lexer::extract_fences(markup);
        self.assemble(&segments, &table)
    }

    /// Render blocks as canonical markup.
    pub fn to_markup(&self, blocks: &[Block]) -> String {
        render::render_blocks(blocks)
    }

    /// Resolve placeholders against the code side table and build blocks.
    ///
    /// A placeholder without a table entry degrades to an error marker
    /// paragraph instead of failing the conversion.
    pub fn assemble(&self, segments: &[Segment], table: &[CodeSegment]) -> Vec<Block> {
        let mut builder = BlockBuilder::new();

        for segment in segments {
            match segment {
                Segment::Text(text) => builder.push_markup(text),
                Segment::Code(index) => match resolve_code(table, *index) {
                    Ok(block) => builder.push_block(block),
                    Err(e) => {
                        warn!(error = %e, "Code block integrity error");
                        builder.push_block(Block::paragraph(CODE_SEGMENT_ERROR_MARKER));
                    }
                },
            }
        }

        builder.finish()
    }
}

fn resolve_code(table: &[CodeSegment], index: usize) -> Result<Block> {
    table
        .get(index)
        .map(|code| Block::code(code.content.clone(), code.language))
        .ok_or(MarkupError::MissingCodeSegment {
            index,
            available: table.len(),
        })
}
