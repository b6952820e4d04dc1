use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::ops::Range;

use anyhow::{ensure, Context, Result};

// lines are short, so this only ever has to pull in a few bytes past the naive split point.
const SCAN_BUF_SIZE: usize = 1 << 12;

/// A half-open byte range `[start, end)` of the input. `start` is 0 or right after a `\n`, `end`
/// is the input length or right after a `\n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
}

impl Segment {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start as usize..self.end as usize
    }
}

/// Splits `len` bytes of `source` into exactly `workers` contiguous segments.
///
/// Naive split points sit at `i * len / workers`. Each interior one is moved forward to just past
/// the next `\n` (a point that's already at a line start stays put), so every line lands in exactly
/// one segment. If the last line has no terminator the scan stops at EOF and the line stays with
/// the segment before. Small inputs or many workers give empty segments.
pub fn split_segments<R: Read + Seek>(source: R, len: u64, workers: usize) -> Result<Vec<Segment>> {
    ensure!(workers > 0, "cannot split input between zero workers");
    let mut reader = BufReader::with_capacity(SCAN_BUF_SIZE, source);
    let mut scratch = Vec::new();

    let mut split_points = Vec::with_capacity(workers + 1);
    let mut prev = 0;
    split_points.push(prev);
    for i in 1..workers {
        let naive = (i as u128 * len as u128 / workers as u128) as u64;
        // a naive point inside the previous segment just produces an empty one
        let point = if naive <= prev {
            prev
        } else {
            align_forward(&mut reader, &mut scratch, naive, len)?
        };
        split_points.push(point);
        prev = point;
    }
    split_points.push(len);

    Ok(split_points
        .windows(2)
        .map(|w| Segment {
            start: w[0],
            end: w[1],
        })
        .collect())
}

// `naive` is > 0. we start looking at the byte before it, so if that's a `\n` the point is
// already aligned.
fn align_forward<R: Read + Seek>(
    reader: &mut BufReader<R>,
    scratch: &mut Vec<u8>,
    naive: u64,
    len: u64,
) -> Result<u64> {
    let from = naive - 1;
    reader
        .seek(SeekFrom::Start(from))
        .with_context(|| format!("seeking to split point {from}"))?;
    scratch.clear();
    let read = reader
        .read_until(b'\n', scratch)
        .with_context(|| format!("scanning for line end after offset {from}"))?;
    Ok((from + read as u64).min(len))
}
