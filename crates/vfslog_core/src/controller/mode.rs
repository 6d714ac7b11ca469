//! Controller operation modes.

use std::fmt;

/// What the controller does with log data it truncates.
///
/// Persisted as a little-endian `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationMode {
    /// Truncate the log without keeping its data.
    #[default]
    DropData,
    /// Fold truncated data into the compacted state first.
    CompactData,
    /// Compaction failed; data is dropped until the mode is reset.
    Corrupted,
}

impl OperationMode {
    /// Returns the persisted value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::DropData => 0,
            Self::CompactData => 1,
            Self::Corrupted => 2,
        }
    }

    /// Converts from the persisted value.
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::DropData),
            1 => Some(Self::CompactData),
            2 => Some(Self::Corrupted),
            _ => None,
        }
    }

    /// Returns true if the mode keeps a compacted model.
    #[must_use]
    pub const fn compacts(self) -> bool {
        matches!(self, Self::CompactData)
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DropData => "drop-data",
            Self::CompactData => "compact-data",
            Self::Corrupted => "corrupted",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_values() {
        assert_eq!(OperationMode::default(), OperationMode::DropData);
        for mode in [
            OperationMode::DropData,
            OperationMode::CompactData,
            OperationMode::Corrupted,
        ] {
            assert_eq!(OperationMode::from_i32(mode.as_i32()), Some(mode));
        }
        assert_eq!(OperationMode::CompactData.as_i32(), 1);
        assert_eq!(OperationMode::from_i32(7), None);
    }
}
