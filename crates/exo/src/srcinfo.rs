use std::{fmt, rc::Rc, sync::Arc};

use ruff_text_size::TextRange;

/// An immutable source span: file, 1-based line/column, inclusive end.
///
/// Every IR node carries one. Spans are propagated, never consulted, during
/// rewrites — except to stamp newly synthesized nodes with the span of the
/// node whose identity they inherit.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SrcInfo {
    pub file: Arc<str>,
    pub line: u32,
    pub col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl fmt::Display for SrcInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

/// Where a piece of source text came from: file name, the line it starts on,
/// and the leading dedent width stripped before parsing.
///
/// The core never reads files itself; callers hand it source text plus this
/// anchor so spans point back at the defining site.
#[derive(Debug, Clone, Default)]
pub struct SourceAnchor {
    pub file: String,
    pub line_offset: u32,
    pub col_offset: u32,
}

impl SourceAnchor {
    pub fn new(file: &str) -> Self {
        Self {
            file: file.to_owned(),
            line_offset: 0,
            col_offset: 0,
        }
    }

    pub fn at(file: &str, line_offset: u32, col_offset: u32) -> Self {
        Self {
            file: file.to_owned(),
            line_offset,
            col_offset,
        }
    }
}

/// Converts byte ranges of one source buffer into [`SrcInfo`] spans.
///
/// Cheap to clone; the quote/unquote machinery carries one alongside retained
/// host-AST fragments so late re-parses report spans in the original frame.
#[derive(Debug, Clone)]
pub(crate) struct SpanMap {
    file: Arc<str>,
    line_offset: u32,
    col_offset: u32,
    /// Byte offset of each newline in the source buffer.
    line_ends: Rc<Vec<usize>>,
}

impl SpanMap {
    pub(crate) fn new(code: &str, anchor: &SourceAnchor) -> Self {
        let mut line_ends = vec![];
        for (i, b) in code.bytes().enumerate() {
            if b == b'\n' {
                line_ends.push(i);
            }
        }
        Self {
            file: Arc::from(anchor.file.as_str()),
            line_offset: anchor.line_offset,
            col_offset: anchor.col_offset,
            line_ends: Rc::new(line_ends),
        }
    }

    /// Line (0-based) and column (0-based) of a byte offset.
    fn line_col(&self, offset: usize) -> (u32, u32) {
        let line = self.line_ends.partition_point(|&end| end < offset);
        let line_start = if line == 0 { 0 } else { self.line_ends[line - 1] + 1 };
        (
            u32::try_from(line).expect("line count exceeds u32"),
            u32::try_from(offset - line_start).expect("column exceeds u32"),
        )
    }

    pub(crate) fn span(&self, range: TextRange) -> SrcInfo {
        let (line, col) = self.line_col(range.start().into());
        let (end_line, end_col) = self.line_col(range.end().into());
        SrcInfo {
            file: Arc::clone(&self.file),
            line: self.line_offset + line + 1,
            col: self.col_offset + col + 1,
            end_line: self.line_offset + end_line + 1,
            end_col: self.col_offset + end_col + 1,
        }
    }
}
