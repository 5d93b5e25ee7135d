use std::fmt;
use std::str::FromStr;

use crate::error::{FrameError, Result};

/// Separator between manifest entries.
pub const SEPARATOR: char = ':';

/// Ordered frame lengths, one entry per frame.
///
/// The text form is the decimal lengths joined with `:`, e.g. `"3:0:12"`.
/// Parsing accepts exactly what [`Display`](fmt::Display) produces: ASCII
/// digits only, no signs, no whitespace, no empty entries and no leading
/// zeros other than a lone `0`. The empty string is the manifest of zero
/// frames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Manifest {
    lengths: Vec<usize>,
}

impl Manifest {
    /// Build a manifest from frame lengths.
    pub fn from_lengths(lengths: impl Into<Vec<usize>>) -> Self {
        Self {
            lengths: lengths.into(),
        }
    }

    /// Frame lengths in order.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Number of frames described.
    pub fn frame_count(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Sum of all entries, or `None` if it does not fit in `usize`.
    pub fn total(&self) -> Option<usize> {
        self.lengths
            .iter()
            .try_fold(0usize, |acc, &len| acc.checked_add(len))
    }

    pub(crate) fn push(&mut self, len: usize) {
        self.lengths.push(len);
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, len) in self.lengths.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            write!(f, "{len}")?;
        }
        Ok(())
    }
}

impl FromStr for Manifest {
    type Err = FrameError;

    fn from_str(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Ok(Self::default());
        }

        let mut lengths = Vec::new();
        for (index, entry) in input.split(SEPARATOR).enumerate() {
            lengths.push(parse_entry(input, index, entry)?);
        }

        let manifest = Self { lengths };
        if manifest.total().is_none() {
            return Err(malformed(input, "total length overflows".to_string()));
        }
        Ok(manifest)
    }
}

fn parse_entry(input: &str, index: usize, entry: &str) -> Result<usize> {
    if entry.is_empty() {
        return Err(malformed(input, format!("entry {index} is empty")));
    }
    if entry.starts_with('-') {
        return Err(malformed(input, format!("entry {index} is negative")));
    }
    if !entry.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(
            input,
            format!("entry {index} ({entry:?}) is not a decimal integer"),
        ));
    }
    if entry.len() > 1 && entry.starts_with('0') {
        return Err(malformed(
            input,
            format!("entry {index} ({entry:?}) has a leading zero"),
        ));
    }
    entry
        .parse::<usize>()
        .map_err(|_| malformed(input, format!("entry {index} ({entry:?}) overflows")))
}

fn malformed(input: &str, reason: String) -> FrameError {
    FrameError::MalformedManifest {
        input: input.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(input: &str) -> String {
        match input.parse::<Manifest>() {
            Err(FrameError::MalformedManifest { reason, .. }) => reason,
            other => panic!("expected MalformedManifest for {input:?}, got {other:?}"),
        }
    }

    #[test]
    fn display_joins_with_colons() {
        assert_eq!(Manifest::from_lengths(vec![3, 0, 12]).to_string(), "3:0:12");
        assert_eq!(Manifest::from_lengths(vec![5]).to_string(), "5");
        assert_eq!(Manifest::default().to_string(), "");
    }

    #[test]
    fn parses_canonical_text() {
        let manifest: Manifest = "5:0:3".parse().unwrap();
        assert_eq!(manifest.lengths(), &[5, 0, 3]);
        assert_eq!(manifest.frame_count(), 3);
        assert_eq!(manifest.total(), Some(8));
    }

    #[test]
    fn empty_text_is_zero_frames() {
        let manifest: Manifest = "".parse().unwrap();
        assert!(manifest.is_empty());
        assert_eq!(manifest.total(), Some(0));
    }

    #[test]
    fn rejects_negative_entries() {
        assert!(reason("3:-1:4").contains("negative"));
        assert!(reason("-0").contains("negative"));
    }

    #[test]
    fn rejects_empty_entries() {
        assert!(reason("3::4").contains("empty"));
        assert!(reason(":").contains("empty"));
        assert!(reason("3:").contains("empty"));
    }

    #[test]
    fn rejects_non_digits() {
        for input in ["abc", "3:4x", " 3", "3 ", "+3", "3,4", "0x10", "1.5"] {
            assert!(
                reason(input).contains("not a decimal integer"),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn rejects_leading_zeros() {
        assert!(reason("007").contains("leading zero"));
        assert!(reason("1:00").contains("leading zero"));
    }

    #[test]
    fn rejects_entry_overflow() {
        let input = format!("{}0", usize::MAX);
        assert!(reason(&input).contains("overflows"));
    }

    #[test]
    fn rejects_total_overflow() {
        let input = format!("{}:1", usize::MAX);
        assert!(reason(&input).contains("total length overflows"));
    }

    #[test]
    fn total_of_constructed_manifest_can_overflow() {
        let manifest = Manifest::from_lengths(vec![usize::MAX, 1]);
        assert_eq!(manifest.total(), None);
    }
}
