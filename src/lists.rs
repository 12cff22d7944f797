//! Parsing helpers for list-shaped option values.

use std::collections::HashSet;
use std::path::Path;

/// Parse either a comma separated literal or a path to a newline separated file.
///
/// A raw value naming an existing regular file is always read as a file, so
/// `wordlist.txt` and `a,b,c` normalise to the same kind of list. Entries are
/// trimmed and blank entries dropped.
pub fn parse_list(raw: &str) -> std::io::Result<Vec<String>> {
    let raw = raw.trim();
    let path = Path::new(raw);
    if !raw.is_empty() && path.is_file() {
        let content = std::fs::read_to_string(path)?;
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        return Ok(entries);
    }

    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

/// Parse `22,80,8000-8100` into a de-duplicated port list, keeping first-seen order.
///
/// Tokens that are not a port or a well formed range are skipped. Port 0 is never
/// returned.
pub fn parse_ports(raw: &str) -> Vec<u16> {
    let mut seen = HashSet::new();
    let mut ports = Vec::new();

    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let range = match token.split_once('-') {
            Some((start, end)) => match (start.trim().parse::<u16>(), end.trim().parse::<u16>()) {
                (Ok(s), Ok(e)) if s <= e => s..=e,
                _ => continue,
            },
            None => match token.parse::<u16>() {
                Ok(p) => p..=p,
                Err(_) => continue,
            },
        };
        for port in range {
            if port != 0 && seen.insert(port) {
                ports.push(port);
            }
        }
    }
    ports
}

/// Render ports back into the compact `a,b-c` form, sorted ascending.
pub fn compress_ports(ports: &[u16]) -> String {
    let mut sorted = ports.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts: Vec<String> = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while let Some(&next) = iter.peek() {
            if next == end + 1 {
                end = next;
                iter.next();
            } else {
                break;
            }
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
    }
    parts.join(",")
}

/// Parse a comma list of non-negative integers. `None` when any token is not a number.
pub fn parse_numbers(raw: &str) -> Option<Vec<u64>> {
    let mut out = Vec::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let n = token.parse::<u64>().ok()?;
        if !out.contains(&n) {
            out.push(n);
        }
    }
    Some(out)
}
