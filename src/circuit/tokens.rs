//! Whitespace tokenizer and string escaping for circuit files.

use std::str::SplitWhitespace;

use tracing::warn;

/// Escape a string so it survives whitespace tokenizing as one token.
pub fn escape(s: &str) -> String {
    if s.is_empty() {
        return "\\0".to_string();
    }
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '+' => out.push_str("\\p"),
            '=' => out.push_str("\\q"),
            '#' => out.push_str("\\h"),
            '&' => out.push_str("\\a"),
            ' ' => out.push_str("\\s"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverse of [`escape`]. Unknown escapes keep the escaped character.
pub fn unescape(s: &str) -> String {
    if s == "\\0" {
        return String::new();
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('p') => out.push('+'),
            Some('q') => out.push('='),
            Some('h') => out.push('#'),
            Some('a') => out.push('&'),
            Some('s') => out.push(' '),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Fields of one circuit-file line.
///
/// Missing trailing fields silently take their default so older files load.
/// Fields that are present but malformed also take their default and leave
/// a warning.
#[derive(Debug)]
pub struct Tokens<'a> {
    iter: SplitWhitespace<'a>,
    line: usize,
    warnings: Vec<String>,
}

impl<'a> Tokens<'a> {
    pub fn new(text: &'a str, line: usize) -> Self {
        Self {
            iter: text.split_whitespace(),
            line,
            warnings: Vec::new(),
        }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    /// Next raw token.
    pub fn next_raw(&mut self) -> Option<&'a str> {
        self.iter.next()
    }

    fn bad(&mut self, field: &str, token: &str) {
        let message = format!("line {}: bad value '{}' for {}, using default", self.line, token, field);
        warn!(line = self.line, field, token, "bad circuit file field, using default");
        self.warnings.push(message);
    }

    pub fn f64_or(&mut self, field: &str, default: f64) -> f64 {
        let Some(token) = self.iter.next() else {
            return default;
        };
        match token.parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => {
                self.bad(field, token);
                default
            }
        }
    }

    pub fn usize_or(&mut self, field: &str, default: usize) -> usize {
        let Some(token) = self.iter.next() else {
            return default;
        };
        // Counts are sometimes written as floats
        match token.parse::<usize>() {
            Ok(v) => v,
            Err(_) => match token.parse::<f64>() {
                Ok(v) if v >= 0.0 && v.fract() == 0.0 => v as usize,
                _ => {
                    self.bad(field, token);
                    default
                }
            },
        }
    }

    /// A count bounded by `max`. Larger counts warn and are clamped, so a
    /// corrupt file never sizes an allocation.
    pub fn count_or(&mut self, field: &str, default: usize, max: usize) -> usize {
        let count = self.usize_or(field, default);
        self.clamp_count(field, count, max)
    }

    /// Count of records `width` tokens wide, clamped to the records that
    /// start on the rest of the line. A short last record still counts.
    pub fn record_count(&mut self, field: &str, width: usize) -> usize {
        let count = self.usize_or(field, 0);
        let max = self.remaining().div_ceil(width.max(1));
        self.clamp_count(field, count, max)
    }

    fn clamp_count(&mut self, field: &str, count: usize, max: usize) -> usize {
        if count <= max {
            return count;
        }
        let message = format!("line {}: {} {} exceeds {}, clamped", self.line, field, count, max);
        warn!(line = self.line, field, count, max, "count too large, clamped");
        self.warnings.push(message);
        max
    }

    /// Tokens left on the line.
    pub fn remaining(&self) -> usize {
        self.iter.clone().count()
    }

    /// Unescaped string field.
    pub fn string_or(&mut self, default: &str) -> String {
        match self.iter.next() {
            Some(token) => unescape(token),
            None => default.to_string(),
        }
    }

    /// Required integer, `None` when missing or malformed.
    pub fn required_i32(&mut self) -> Option<i32> {
        self.iter.next()?.parse().ok()
    }

    pub fn required_u32(&mut self) -> Option<u32> {
        self.iter.next()?.parse().ok()
    }

    /// Warnings collected so far.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_round_trip() {
        let raw = "a b+c=d#e&f\\g\nh";
        let escaped = escape(raw);
        assert!(!escaped.contains(' '));
        assert_eq!(escaped, "a\\sb\\pc\\qd\\he\\af\\\\g\\nh");
        assert_eq!(unescape(&escaped), raw);
        assert_eq!(escape(""), "\\0");
        assert_eq!(unescape("\\0"), "");
    }

    #[test]
    fn test_missing_fields_default_silently() {
        let mut t = Tokens::new("12.5", 3);
        assert_eq!(t.f64_or("resistance", 1.0), 12.5);
        assert_eq!(t.f64_or("other", 7.0), 7.0);
        assert_eq!(t.string_or("x"), "x");
        assert!(t.take_warnings().is_empty());
    }

    #[test]
    fn test_bad_fields_warn() {
        let mut t = Tokens::new("abc 2.0 nan", 9);
        assert_eq!(t.f64_or("gain", 1.0), 1.0);
        assert_eq!(t.usize_or("count", 2), 2);
        assert_eq!(t.f64_or("bias", 0.0), 0.0);
        let warnings = t.take_warnings();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("line 9"));
        assert!(warnings[1].contains("bias"));
    }

    #[test]
    fn test_oversized_count_is_clamped() {
        let mut t = Tokens::new("1e20 a b c d", 4);
        assert_eq!(t.record_count("row count", 3), 2);
        assert_eq!(t.remaining(), 4);
        let warnings = t.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("row count"));

        let mut t = Tokens::new("2 x y", 1);
        assert_eq!(t.count_or("inputs", 2, 16), 2);
        assert!(t.take_warnings().is_empty());
    }
}
