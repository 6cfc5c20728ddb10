//! Fixed-width aligned table output.
//!
//! Each column is as wide as the longer of its header label and its longest
//! value; columns are separated by two spaces and left-aligned. Shape
//! violations (empty row set, a row whose field count differs from the
//! header's) are programming errors upstream and abort via `assert!` rather
//! than being recovered from.

/// Renders rows under a header as an aligned table, one line per row,
/// terminated by newlines.
///
/// # Panics
///
/// Panics if `rows` is empty or any row's field count differs from the
/// header's.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    assert!(!rows.is_empty(), "render_table called with no rows");
    for row in rows {
        assert_eq!(
            row.len(),
            headers.len(),
            "row field count {} does not match header field count {}",
            row.len(),
            headers.len()
        );
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let mut out = String::new();
    push_line(&mut out, &widths, headers.iter().copied());
    for row in rows {
        push_line(&mut out, &widths, row.iter().map(String::as_str));
    }
    out
}

fn push_line<'a>(out: &mut String, widths: &[usize], cells: impl Iterator<Item = &'a str>) {
    let mut line = String::new();
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            line.push_str("  ");
        }
        line.push_str(&format!("{:<width$}", cell, width = widths[i]));
    }
    out.push_str(line.trim_end());
    out.push('\n');
}
