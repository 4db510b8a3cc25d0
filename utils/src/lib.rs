#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub mod fs;

/// Rounds `value` up to the next multiple of `multiple`.
///
/// Returns `None` if the result does not fit in a `u64`.
#[must_use]
#[inline]
pub fn next_multiple(value: u64, multiple: u64) -> Option<u64> {
    if multiple == 0 {
        return Some(value);
    }
    value.div_ceil(multiple).checked_mul(multiple)
}

/// Truncates `value` to at most `max_chars` characters.
#[must_use]
pub fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts as diff;

    #[test]
    fn test_next_multiple() {
        diff::assert_eq!(have: super::next_multiple(0, 256), want: Some(0));
        diff::assert_eq!(have: super::next_multiple(1, 256), want: Some(256));
        diff::assert_eq!(have: super::next_multiple(512, 256), want: Some(512));
        diff::assert_eq!(have: super::next_multiple(7, 0), want: Some(7));
        diff::assert_eq!(have: super::next_multiple(u64::MAX - 3, 256), want: None);
    }

    #[test]
    fn test_truncate_chars() {
        diff::assert_eq!(have: super::truncate_chars("vecadd", 20), want: "vecadd");
        diff::assert_eq!(
            have: super::truncate_chars("_Z8mult_gpuIfEvPKT_S2_PS0_mmm", 20),
            want: "_Z8mult_gpuIfEvPKT_S"
        );
        diff::assert_eq!(have: super::truncate_chars("äöü", 2), want: "äö");
    }
}
