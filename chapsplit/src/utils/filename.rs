//! Filename sanitization for track destinations.
//!
//! Track names come straight from chapter titles, which routinely contain
//! characters that are invalid on Windows (`Intro: Part 1?`). Everything is
//! reduced to a base name that is safe on Windows, Linux and macOS while
//! keeping valid Unicode such as CJK text.

use std::collections::HashSet;

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Longest base name we produce, in characters.
pub const MAX_BASE_NAME_CHARS: usize = 200;

/// Fallback for names that sanitize to nothing.
pub const FALLBACK_BASE_NAME: &str = "untitled";

/// Sanitize a track title into a destination base name (no extension).
///
/// 1. Control characters and `<>:"/\|?*` each become `_`
/// 2. Leading/trailing spaces and dots are trimmed
/// 3. Runs of two or more dots become a single `_`
/// 4. The result is capped at [`MAX_BASE_NAME_CHARS`]
/// 5. Windows reserved names get a `_` prefix
/// 6. An empty result becomes [`FALLBACK_BASE_NAME`]
///
/// ```
/// use chapsplit::utils::filename::sanitize_filename;
///
/// assert_eq!(sanitize_filename("Intro: Part 1?"), "Intro_ Part 1_");
/// assert_eq!(sanitize_filename("Wait... what"), "Wait_ what");
/// assert_eq!(sanitize_filename(""), "untitled");
/// assert_eq!(sanitize_filename("CON"), "_CON");
/// ```
pub fn sanitize_filename(input: &str) -> String {
    let replaced: String = input
        .chars()
        .map(|c| {
            if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let collapsed = collapse_dot_runs(trim_name(&replaced));
    let capped: String = collapsed.chars().take(MAX_BASE_NAME_CHARS).collect();
    let trimmed = trim_name(&capped);

    if trimmed.is_empty() {
        return FALLBACK_BASE_NAME.to_string();
    }

    let upper = trimmed.to_uppercase();
    for reserved in WINDOWS_RESERVED_NAMES {
        if upper == *reserved || upper.starts_with(&format!("{}.", reserved)) {
            return format!("_{}", trimmed);
        }
    }

    trimmed.to_string()
}

fn trim_name(name: &str) -> &str {
    name.trim_matches(|c| c == ' ' || c == '.')
}

fn collapse_dot_runs(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut dots = 0usize;

    for c in name.chars() {
        if c == '.' {
            dots += 1;
            continue;
        }
        flush_dots(&mut result, dots);
        dots = 0;
        result.push(c);
    }
    flush_dots(&mut result, dots);

    result
}

fn flush_dots(out: &mut String, dots: usize) {
    match dots {
        0 => {}
        1 => out.push('.'),
        _ => out.push('_'),
    }
}

/// Hands out base names that are unique within one batch.
///
/// The first claim of a name returns it unchanged; later claims get ` (2)`,
/// ` (3)`, ... appended. The base is shortened first when needed so the
/// suffixed name still fits [`MAX_BASE_NAME_CHARS`]. Comparison ignores case
/// so the names stay distinct on case-insensitive filesystems too.
#[derive(Debug, Default)]
pub struct UniqueNames {
    seen: HashSet<String>,
}

impl UniqueNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, base: &str) -> String {
        let mut candidate = fit_base(base, MAX_BASE_NAME_CHARS).to_string();
        let mut n = 2;
        while !self.seen.insert(candidate.to_lowercase()) {
            let suffix = format!(" ({n})");
            let room = MAX_BASE_NAME_CHARS.saturating_sub(suffix.chars().count());
            candidate = format!("{}{suffix}", fit_base(base, room));
            n += 1;
        }
        candidate
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// First `max_chars` characters of `base`, without a dangling space or dot.
fn fit_base(base: &str, max_chars: usize) -> &str {
    let end = base
        .char_indices()
        .nth(max_chars)
        .map_or(base.len(), |(i, _)| i);
    trim_name(&base[..end])
}
