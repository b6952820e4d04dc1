use std::collections::hash_map::Entry;

use crate::config::DELIMITER;

pub type StrImpl = smol_str::SmolStr;
pub type AggMap = rustc_hash::FxHashMap<StrImpl, Aggregate>;

/// Running statistics for one key. The mean isn't stored, it's `sum / count` at report time.
// no `Default`: an aggregate always starts from its first value, so `count` is never 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl Aggregate {
    #[inline]
    pub fn new(num: f64) -> Self {
        Self {
            count: 1,
            sum: num,
            min: num,
            max: num,
        }
    }
    #[inline]
    pub fn insert(&mut self, num: f64) {
        self.count += 1;
        self.sum += num;
        self.min = self.min.min(num);
        self.max = self.max.max(num);
    }
    // associative and commutative, so workers can merge in whatever order they finish
    #[inline]
    pub fn merge(&mut self, other: Aggregate) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
    #[inline]
    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

// `lines` includes the skipped ones
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineCounts {
    pub lines: u64,
    pub skipped: u64,
}

impl std::ops::AddAssign for LineCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.lines += rhs.lines;
        self.skipped += rhs.skipped;
    }
}

/// Turns one raw line into a `(key, value)` pair, or `None` if the line is malformed.
///
/// Trailing whitespace (including a `\r` or `\n` terminator) is stripped, then the line is split
/// on the *first* delimiter. Both halves must be non-empty, the key must be utf-8, and the value
/// must parse as an `f64` that isn't NaN. Anything after a second delimiter ends up in the value
/// field and fails the number parse, so those lines are rejected too.
pub fn parse_line(line: &[u8]) -> Option<(&str, f64)> {
    let line = line.trim_ascii_end();
    let sep_pos = line.iter().position(|c| *c == DELIMITER)?;
    let (key, value) = (&line[..sep_pos], &line[sep_pos + 1..]);
    if key.is_empty() || value.is_empty() {
        return None;
    }
    let key = std::str::from_utf8(key).ok()?;
    // std's float parser takes sign, decimal point, exponent and "inf". it also takes "nan",
    // which would break min <= max.
    let value: f64 = std::str::from_utf8(value).ok()?.parse().ok()?;
    (!value.is_nan()).then_some((key, value))
}

// false if the line was skipped
#[inline]
pub fn fold_line(line: &[u8], totals: &mut AggMap) -> bool {
    let Some((key, value)) = parse_line(line) else {
        return false;
    };
    match totals.entry(StrImpl::from(key)) {
        Entry::Occupied(entry) => {
            entry.into_mut().insert(value);
        }
        Entry::Vacant(entry) => {
            entry.insert(Aggregate::new(value));
        }
    }
    true
}

/// Folds every line of `chunk` into `totals`. The chunk is expected to start at a line boundary;
/// the final line doesn't need a terminator.
pub fn process_chunk(chunk: &[u8], totals: &mut AggMap) -> LineCounts {
    let mut counts = LineCounts::default();
    if chunk.is_empty() {
        return counts;
    }
    // a trailing terminator ends the last line, it doesn't start an empty one
    let body = chunk.strip_suffix(b"\n").unwrap_or(chunk);
    for line in body.split(|c| *c == b'\n') {
        counts.lines += 1;
        if !fold_line(line, totals) {
            counts.skipped += 1;
        }
    }
    counts
}
