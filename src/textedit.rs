// Copyright 2021 Martin Pool

//! Edit source code by line/column region, independent of what produced the
//! region.

use serde::Serialize;

/// A (line, column) position in a source file.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize)]
pub struct LineColumn {
    /// 1-based line number.
    pub line: usize,

    /// 1-based column, measured in chars.
    pub column: usize,
}

impl LineColumn {
    /// Convert a 0-based UTF-8 byte offset, as produced by
    /// `rustpython_parser`'s text ranges, into a 1-based line/column.
    ///
    /// This walks `source` once; callers doing this for every node in a file
    /// should prefer building a line-start index instead, but targets are
    /// few enough per file that this is not worth the complexity.
    pub fn from_byte_offset(source: &str, offset: usize) -> LineColumn {
        let mut line = 1;
        let mut column = 1;
        for (i, c) in source.char_indices() {
            if i >= offset {
                break;
            }
            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        LineColumn { line, column }
    }
}

/// A contiguous text span in a file.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Serialize)]
pub struct Span {
    /// The inclusive position where the span starts.
    pub start: LineColumn,
    /// The inclusive position where the span ends.
    pub end: LineColumn,
}

impl Span {
    /// Build a span from a pair of 0-based byte offsets into `source`.
    pub fn from_byte_range(source: &str, start: usize, end: usize) -> Span {
        Span {
            start: LineColumn::from_byte_offset(source, start),
            end: LineColumn::from_byte_offset(source, end),
        }
    }
}

/// Replace a subregion of text.
///
/// Returns a copy of `s` with the region between `start` and `end` inclusive
/// replaced by `replacement`.
pub fn replace_region(s: &str, start: &LineColumn, end: &LineColumn, replacement: &str) -> String {
    let mut r = String::with_capacity(s.len() + replacement.len());
    let mut line_no = 1;
    let mut col_no = 1;
    for c in s.chars() {
        if line_no < start.line
            || line_no > end.line
            || (line_no == start.line && col_no < start.column)
            || (line_no == end.line && col_no > end.column)
        {
            r.push(c);
        } else if line_no == start.line && col_no == start.column {
            r.push_str(replacement);
        }
        if c == '\n' {
            line_no += 1;
            col_no = 1;
        } else if c == '\r' {
            // counts as part of the last column, not a separate column
        } else {
            col_no += 1;
        }
    }
    r
}

/// Return the column (1-based) of the first non-whitespace character on
/// `line_no` (1-based) of `s`, used to re-indent a spliced-in body to match
/// the column of the first original body statement.
pub fn indent_column_of_line(s: &str, line_no: usize) -> usize {
    s.lines()
        .nth(line_no - 1)
        .map(|line| line.len() - line.trim_start().len() + 1)
        .unwrap_or(1)
}

/// Re-indent `text` so that every non-blank line starts at `column` (1-based),
/// replacing whatever common leading whitespace the lines currently share.
pub fn reindent(text: &str, column: usize) -> String {
    let pad = " ".repeat(column.saturating_sub(1));
    text.lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("{pad}{}", line.trim_start())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prepend `column - 1` spaces to every non-blank line of `text`, leaving
/// each line's own existing indentation untouched — unlike [`reindent`],
/// which discards it. Used where `text` already has internal multi-level
/// structure (e.g. a whole class body with nested method bodies) that a
/// flat re-indent would destroy.
pub fn left_pad(text: &str, column: usize) -> String {
    let pad = " ".repeat(column.saturating_sub(1));
    text.lines()
        .map(|line| if line.is_empty() { String::new() } else { format!("{pad}{line}") })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod test {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn replace_treats_crlf_as_part_of_last_column() {
        let source = "fn foo() {\r\n    wibble();\r\n}\r\n//hey!\r\n";
        assert_eq!(
            replace_region(
                source,
                &LineColumn {
                    line: 1,
                    column: 10
                },
                &LineColumn { line: 3, column: 2 },
                "{}\r\n"
            ),
            "fn foo() {}\r\n//hey!\r\n"
        );
    }

    #[test]
    fn test_replace_region() {
        let source = indoc! { r#"

            def foo():
                some()
                stuff()

            BAR = 32
        "# };
        let replaced = replace_region(
            source,
            &LineColumn {
                line: 2,
                column: 11,
            },
            &LineColumn { line: 5, column: 1 },
            " pass  # body deleted",
        );
        assert_eq!(
            replaced,
            indoc! { r#"

                def foo(): pass  # body deleted

                BAR = 32
            "# }
        );
    }

    #[test]
    fn from_byte_offset_counts_newlines() {
        let source = "abc\ndef\nghi";
        assert_eq!(
            LineColumn::from_byte_offset(source, 0),
            LineColumn { line: 1, column: 1 }
        );
        assert_eq!(
            LineColumn::from_byte_offset(source, 4),
            LineColumn { line: 2, column: 1 }
        );
        assert_eq!(
            LineColumn::from_byte_offset(source, 9),
            LineColumn { line: 3, column: 2 }
        );
    }

    #[test]
    fn reindent_matches_target_column() {
        let body = "x = 1\ny = 2";
        assert_eq!(reindent(body, 5), "    x = 1\n    y = 2");
    }

    #[test]
    fn left_pad_preserves_relative_indentation() {
        let body = "class C:\n    def a(self):\n        return 1";
        assert_eq!(
            left_pad(body, 5),
            "    class C:\n        def a(self):\n            return 1"
        );
    }

    #[test]
    fn indent_column_of_line_skips_leading_whitespace() {
        let s = "def f():\n    return 1\n";
        assert_eq!(indent_column_of_line(s, 2), 5);
    }
}
