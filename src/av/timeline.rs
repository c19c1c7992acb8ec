use std::collections::BTreeMap;
use std::fmt;

/// Size and type information for one access unit.
#[derive(Debug, Clone, PartialEq)]
pub struct BitrateEntry {
    /// Presentation order number (the POC of the access unit's picture)
    pub pts: i64,
    /// Decoding order number (the access unit counter)
    pub dts: i64,
    pub duration: u32,
    pub byte_size: u64,
    /// True if every slice of the access unit was intra coded
    pub keyframe: bool,
    /// Slice type counts, e.g. `"2 I 1 P"`
    pub frame_type_summary: String,
}

/// Counts slice types of the current access unit in a stable order.
#[derive(Debug, Default, Clone)]
pub struct SliceTypeCounts {
    counts: BTreeMap<&'static str, u32>,
}

impl SliceTypeCounts {
    pub fn add(&mut self, slice_type: &'static str) {
        *self.counts.entry(slice_type).or_insert(0) += 1;
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl fmt::Display for SliceTypeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, count)) in self.counts.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{} {}", count, name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrdEntryKind {
    Adding,
    Removal,
}

/// One segment of the coded picture buffer fill level over time.
///
/// Times are in seconds, fullness in bits.
#[derive(Debug, Clone, PartialEq)]
pub struct HrdEntry {
    pub kind: HrdEntryKind,
    pub cpb_fullness_start: u64,
    pub cpb_fullness_end: u64,
    pub time_start: f64,
    pub time_end: f64,
    pub poc: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_slice_type_summary() {
        let mut counts = SliceTypeCounts::default();
        assert!(counts.is_empty());
        counts.add("P");
        counts.add("I");
        counts.add("I");
        assert_eq!(counts.to_string(), "2 I 1 P");
        counts.clear();
        assert_eq!(counts.to_string(), "");
    }
}
