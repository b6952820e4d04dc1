use std::fmt::Write;

use crate::compute::{Aggregate, StrImpl};

/// Formats sorted results as `{key=min/mean/max, ...}` with one decimal place per number.
pub fn format_summary(result: &[(StrImpl, Aggregate)]) -> String {
    let mut out = String::with_capacity(result.len() * 35 + 2);
    out.push('{');
    for (i, (k, v)) in result.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write!(out, "{}={:.1}/{:.1}/{:.1}", k, v.min, v.mean(), v.max).unwrap();
    }
    out.push('}');
    out
}
