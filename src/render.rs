//! Plain-text table layout for console output.

const FALLBACK_TERMINAL_WIDTH: u16 = 120;
const COLUMN_GAP: &str = "  ";

/// Widest a single cell may be before it wraps: a third of the terminal.
pub fn max_cell_width() -> usize {
    let width = crossterm::terminal::size()
        .map(|(w, _)| w)
        .ok()
        .filter(|w| *w > 0)
        .unwrap_or(FALLBACK_TERMINAL_WIDTH);
    (usize::from(width) / 3).max(8)
}

/// Split `cell` into pieces of at most `width` characters, preferring spaces.
fn wrap_cell(cell: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for raw in cell.lines() {
        let mut rest: Vec<char> = raw.chars().collect();
        while rest.len() > width {
            let cut = rest[..=width]
                .iter()
                .rposition(|c| *c == ' ')
                .filter(|&i| i > 0)
                .unwrap_or(width);
            lines.push(rest[..cut].iter().collect::<String>().trim_end().to_string());
            let skip = if rest.get(cut) == Some(&' ') { cut + 1 } else { cut };
            rest.drain(..skip);
        }
        lines.push(rest.into_iter().collect());
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Lay out `rows` under an optional `header`, padding every column to its widest
/// cell and wrapping cells longer than `max_width`.
pub fn render_table(header: &[String], rows: &[Vec<String>], max_width: usize) -> Vec<String> {
    let max_width = max_width.max(1);
    let columns = rows
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(header.len()))
        .max()
        .unwrap_or(0);
    if columns == 0 {
        return Vec::new();
    }

    let wrap_row = |row: &[String]| -> Vec<Vec<String>> {
        (0..columns)
            .map(|i| wrap_cell(row.get(i).map(String::as_str).unwrap_or(""), max_width))
            .collect()
    };
    let header_cells = (!header.is_empty()).then(|| wrap_row(header));
    let body: Vec<Vec<Vec<String>>> = rows.iter().map(|r| wrap_row(r.as_slice())).collect();

    let mut widths = vec![0usize; columns];
    for row in header_cells.iter().chain(body.iter()) {
        for (i, cell) in row.iter().enumerate() {
            let widest = cell.iter().map(|l| l.chars().count()).max().unwrap_or(0);
            widths[i] = widths[i].max(widest);
        }
    }

    let mut out = Vec::new();
    let mut emit = |row: &[Vec<String>]| {
        let height = row.iter().map(Vec::len).max().unwrap_or(1);
        for line in 0..height {
            let text = row
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    let part = cell.get(line).map(String::as_str).unwrap_or("");
                    format!("{part:<width$}", width = widths[i])
                })
                .collect::<Vec<_>>()
                .join(COLUMN_GAP);
            out.push(text.trim_end().to_string());
        }
    };

    if let Some(cells) = &header_cells {
        emit(cells.as_slice());
        let rule: Vec<Vec<String>> = widths.iter().map(|w| vec!["-".repeat(*w)]).collect();
        emit(rule.as_slice());
    }
    for row in &body {
        emit(row.as_slice());
    }
    out
}
