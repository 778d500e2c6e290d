//! Version ordering for picking the newest unit.

use std::cmp::Ordering;

/// Compare two version strings segment by segment.
///
/// Segments are split on `.`, `-` and `+`. Numeric segments compare as
/// numbers, anything else compares as text, and a leading `v` is ignored.
/// When one version is a prefix of the other, the longer one is newer.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = normalize(a);
    let b = normalize(b);

    let mut left = a.split(['.', '-', '+']);
    let mut right = b.split(['.', '-', '+']);

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    // Numeric segments sort after textual ones (1.0 > 1.rc)
                    (Ok(_), Err(_)) => Ordering::Greater,
                    (Err(_), Ok(_)) => Ordering::Less,
                    (Err(_), Err(_)) => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn normalize(version: &str) -> String {
    let v = version.trim().to_lowercase();
    v.strip_prefix('v').map(str::to_string).unwrap_or(v)
}
