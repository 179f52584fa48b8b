//! Terminal rendering of the output pane and the decorated source.

use playground_core::editor::{line_start, Decoration, DecorationKind};
use playground_types::OutputRecord;
use std::collections::BTreeSet;

const RED: &str = "\x1b[31m";
const MAGENTA: &str = "\x1b[35m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Display lines of one record; interpreters escape newlines inside a single
/// record as a literal `\n`
pub fn display_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split("\\n")
}

/// Print records to stdout (logs) and stderr (errors)
pub fn print_records(records: &[OutputRecord], color: bool) {
    for record in records {
        for line in display_lines(&record.text) {
            if !record.is_error {
                println!("{line}");
            } else if color {
                eprintln!("{RED}{line}{RESET}");
            } else {
                eprintln!("{line}");
            }
        }
    }
}

/// Source listing with a line-number gutter. Lines carrying an error
/// decoration are marked with `!`; with `color`, keyword marks are
/// highlighted too.
pub fn render_source(
    text: &str,
    decorations: &[Decoration],
    keywords: &[Decoration],
    color: bool,
) -> String {
    let error_lines: BTreeSet<u32> = decorations
        .iter()
        .filter(|d| d.kind == DecorationKind::Line)
        .map(|d| d.span.start_line)
        .collect();
    let line_total = text.split('\n').count();
    let width = line_total.to_string().len();

    text.split('\n')
        .enumerate()
        .map(|(idx, line)| {
            let number = idx as u32 + 1;
            let is_error = error_lines.contains(&number);
            let marker = match (is_error, color) {
                (true, true) => format!("{RED}!{RESET}"),
                (true, false) => "!".to_string(),
                (false, _) => "|".to_string(),
            };
            let body = if color {
                let start = line_start(text, number).unwrap_or(0);
                highlight_line(line, start, keywords)
            } else {
                line.to_string()
            };

            if body.is_empty() {
                format!("{number:>width$} {marker}")
            } else {
                format!("{number:>width$} {marker} {body}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn keyword_style(class: &str) -> &'static str {
    match class {
        "fun" => MAGENTA,
        "print" => CYAN,
        _ => BOLD,
    }
}

/// Wrap keyword marks falling inside `line` (which starts at byte `start` of
/// the document) in ANSI styles
fn highlight_line(line: &str, start: usize, keywords: &[Decoration]) -> String {
    let end = start + line.len();
    let mut out = String::with_capacity(line.len());
    let mut cursor = 0;

    for mark in keywords
        .iter()
        .filter(|m| m.kind == DecorationKind::Mark && m.from >= start && m.to <= end)
    {
        let (from, to) = (mark.from - start, mark.to - start);
        if from < cursor {
            continue;
        }
        out.push_str(&line[cursor..from]);
        out.push_str(keyword_style(&mark.class));
        out.push_str(&line[from..to]);
        out.push_str(RESET);
        cursor = to;
    }
    out.push_str(&line[cursor..]);
    out
}
