//! Position and code-frame helpers used by hook-error enrichment.

use crate::error::ErrorLoc;

/// Number of context lines shown on each side of a code frame.
const FRAME_CONTEXT_LINES: usize = 2;

/// Convert a byte offset to a (line, column) position in source code.
///
/// Lines are 1-indexed, columns 0-indexed, matching [`ErrorLoc`]. Returns
/// `None` when the offset is past the end of the source.
pub fn offset_to_pos(source: &str, offset: usize) -> Option<(u32, u32)> {
    if offset > source.len() {
        return None;
    }

    let mut line = 1u32;
    let mut col = 0u32;

    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 0;
        } else {
            col += 1;
        }
    }

    Some((line, col))
}

/// Render a multi-line code frame pointing at `loc` inside `source`.
///
/// Shows [`FRAME_CONTEXT_LINES`] lines of context on each side with a
/// numbered gutter and a caret row under the error column. Returns an empty
/// string when the location is outside the source.
pub fn generate_code_frame(source: &str, loc: &ErrorLoc) -> String {
    let lines: Vec<&str> = source.split('\n').collect();
    if loc.line == 0 || loc.line as usize > lines.len() {
        return String::new();
    }

    let target = loc.line as usize;
    let start = target.saturating_sub(FRAME_CONTEXT_LINES + 1) + 1;
    let end = (target + FRAME_CONTEXT_LINES).min(lines.len());
    let gutter_width = end.to_string().len();

    let mut frame = String::new();
    for n in start..=end {
        let text = lines[n - 1];
        frame.push_str(&format!("{:>width$} | {}\n", n, text, width = gutter_width));
        if n == target {
            let column = (loc.column as usize).min(text.len());
            frame.push_str(&format!(
                "{:>width$} | {}^\n",
                "",
                " ".repeat(column),
                width = gutter_width
            ));
        }
    }

    // Drop the trailing newline so the frame embeds cleanly in messages.
    frame.pop();
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_to_pos() {
        let source = "hello\nworld\ntest";

        assert_eq!(offset_to_pos(source, 0), Some((1, 0)));
        assert_eq!(offset_to_pos(source, 3), Some((1, 3)));
        assert_eq!(offset_to_pos(source, 5), Some((1, 5)));
        // Start of "world", past the newline
        assert_eq!(offset_to_pos(source, 6), Some((2, 0)));
        // Start of "test"
        assert_eq!(offset_to_pos(source, 12), Some((3, 0)));
    }

    #[test]
    fn test_offset_past_end() {
        assert_eq!(offset_to_pos("ab", 3), None);
        // Offset exactly at the end is still a valid position
        assert_eq!(offset_to_pos("ab", 2), Some((1, 2)));
    }

    #[test]
    fn test_code_frame_points_at_column() {
        let source = "const a = 1\nconst b = !\nconst c = 3";
        let loc = ErrorLoc {
            file: None,
            line: 2,
            column: 10,
        };
        let frame = generate_code_frame(source, &loc);
        assert!(frame.contains("2 | const b = !"));
        assert!(frame.contains("^"));
        // Caret row sits directly under the offending column
        let caret_row = frame
            .lines()
            .find(|l| l.contains('^'))
            .expect("caret row present");
        assert_eq!(caret_row.find('^').unwrap(), "2 | ".len() + 10);
    }

    #[test]
    fn test_code_frame_context_window() {
        let source = (1..=10)
            .map(|n| format!("line{}", n))
            .collect::<Vec<_>>()
            .join("\n");
        let loc = ErrorLoc {
            file: None,
            line: 5,
            column: 0,
        };
        let frame = generate_code_frame(&source, &loc);
        assert!(frame.contains("3 | line3"));
        assert!(frame.contains("7 | line7"));
        assert!(!frame.contains("line2"));
        assert!(!frame.contains("line8"));
    }

    #[test]
    fn test_code_frame_out_of_range() {
        let loc = ErrorLoc {
            file: None,
            line: 99,
            column: 0,
        };
        assert_eq!(generate_code_frame("one line", &loc), "");
    }
}
