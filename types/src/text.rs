//! Conversion from protocol positions to offsets in document text.
//!
//! Two offset spaces exist. Character indices (`position_to_char_index`) are
//! zero-based counts of Unicode scalar values and are what the annotation store
//! records. Document offsets (`document_offset`) are one-based; diagnostics are
//! compared against stored markers in that space, so a marker whose start is
//! `n` corresponds to a document offset of `n + 1`.

use crate::diagnostic::Position;

/// Convert an LSP position into a zero-based character index into `text`.
///
/// Lines end at `\n`, `\r\n` or a lone `\r`. Columns count UTF-16 code units and
/// are clamped to the end of their line. Returns `None` when `position.line`
/// lies beyond the last line.
#[must_use]
pub fn position_to_char_index(text: &str, position: Position) -> Option<usize> {
    let mut chars = text.chars().peekable();
    let mut index = 0usize;
    let mut line = 0u32;

    while line < position.line {
        match chars.next()? {
            '\n' => line += 1,
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                    index += 1;
                }
                line += 1;
            }
            _ => {}
        }
        index += 1;
    }

    let mut units = 0u32;
    while units < position.character {
        match chars.peek() {
            None | Some('\n' | '\r') => break,
            Some(&c) => {
                units += c.len_utf16() as u32;
                chars.next();
                index += 1;
            }
        }
    }

    Some(index)
}

/// Convert an LSP position into a one-based document offset.
#[must_use]
pub fn document_offset(text: &str, position: Position) -> Option<usize> {
    position_to_char_index(text, position).map(|index| index + 1)
}
