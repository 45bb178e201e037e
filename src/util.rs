//! Shared utility functions.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;

/// Quote a word for `sh`/`bash` unless it is made of safe characters only.
pub fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s.chars().all(|c| {
            c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ',')
        })
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

/// Join a program and its arguments into one escaped shell command line.
pub fn shell_join<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| shell_escape(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compact zone numbers, shifted by `offset`, into range notation.
///
/// `[1, 2, 3, 6, 9, 12, 13]` with offset 0 becomes `"1_3,6,9,12_13"`.
/// Input order and duplicates do not matter.
pub fn compact_ranges(numbers: &[u32], offset: u32) -> String {
    let sorted: BTreeSet<u32> = numbers.iter().map(|n| n + offset).collect();
    let mut parts = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return String::new();
    };

    let (mut start, mut end) = (first, first);
    for n in iter {
        if n == end + 1 {
            end = n;
            continue;
        }
        parts.push(render_range(start, end));
        start = n;
        end = n;
    }
    parts.push(render_range(start, end));
    parts.join(",")
}

fn render_range(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}_{}", start, end)
    }
}

/// Zone numbers picked by a spec such as `"1,3,4_5,7"`.
///
/// Ranges are kept as bounds, so membership costs nothing extra for wide ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneSpec {
    ranges: Vec<RangeInclusive<u32>>,
}

impl ZoneSpec {
    pub fn contains(&self, zone: u32) -> bool {
        self.ranges.iter().any(|r| r.contains(&zone))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[RangeInclusive<u32>] {
        &self.ranges
    }
}

/// Parse a zone spec such as `"1,3,4_5,7"`.
///
/// Ranges are inclusive; reversed ranges and malformed items are ignored.
pub fn parse_zone_spec(spec: &str) -> ZoneSpec {
    let mut ranges = Vec::new();
    for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item.split_once('_') {
            Some((start, end)) => {
                if let (Ok(start), Ok(end)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>()) {
                    if start <= end {
                        ranges.push(start..=end);
                    }
                }
            }
            None => {
                if let Ok(n) = item.parse::<u32>() {
                    ranges.push(n..=n);
                }
            }
        }
    }
    ZoneSpec { ranges }
}
