//! Content restoration sequences.
//!
//! A content record's value is rebuilt from an initial value followed by an
//! ordered list of modifications. Payload-backed pieces are only read when
//! the sequence is materialized.

use crate::error::{CoreError, CoreResult};
use crate::types::{ContentId, PayloadRef};

/// Bytes of a content piece, inline or still in the payload store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentData {
    /// Inline bytes.
    Bytes(Vec<u8>),
    /// Bytes held by the payload store.
    Payload(PayloadRef),
}

/// Initial value of a restoration sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    /// The empty blob.
    Empty,
    /// An explicit value.
    Data(ContentData),
    /// The value this record had in the compacted state.
    Compacted(ContentId),
}

/// One change applied on top of a content value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentModification {
    /// `content ++ data`.
    Append(ContentData),
    /// Bytes `[offset, offset + data.len())` replaced in place; the range
    /// must lie within the content.
    Replace {
        /// Start of the replaced range.
        offset: u64,
        /// Replacement bytes.
        data: ContentData,
    },
    /// Data written at `offset`, growing the content if it runs past the
    /// end; `offset` must not exceed the content length.
    Overwrite {
        /// Write offset.
        offset: u64,
        /// Written bytes.
        data: ContentData,
    },
}

/// Supplies the bytes a restoration sequence refers to.
pub trait ContentResolver {
    /// Reads a payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not available.
    fn payload(&self, payload: PayloadRef) -> CoreResult<Vec<u8>>;

    /// Reads the compacted value of a content record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is not part of the compacted state.
    fn compacted(&self, content: ContentId) -> CoreResult<Vec<u8>>;
}

/// Recipe for rebuilding one content record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RestorationSequence {
    /// No initial value yet; cannot be extended or materialized.
    #[default]
    Unformed,
    /// An initial value plus ordered modifications.
    Formed {
        /// Initial value.
        initial: ContentSource,
        /// Modifications applied in order.
        modifications: Vec<ContentModification>,
    },
}

impl RestorationSequence {
    /// Creates a formed sequence with no modifications.
    #[must_use]
    pub fn starting_with(initial: ContentSource) -> Self {
        Self::Formed {
            initial,
            modifications: Vec::new(),
        }
    }

    /// Returns true if the sequence has an initial value.
    #[must_use]
    pub fn is_formed(&self) -> bool {
        matches!(self, Self::Formed { .. })
    }

    /// Replaces the whole sequence with a new initial value.
    pub fn set(&mut self, initial: ContentSource) {
        *self = Self::starting_with(initial);
    }

    /// Appends a modification.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidContentOperation`] if the sequence is not
    /// formed.
    pub fn modify(&mut self, modification: ContentModification) -> CoreResult<()> {
        match self {
            Self::Unformed => Err(CoreError::invalid_content_operation(
                "cannot modify content without an initial value",
            )),
            Self::Formed { modifications, .. } => {
                modifications.push(modification);
                Ok(())
            }
        }
    }

    /// Rebuilds the content value.
    ///
    /// # Errors
    ///
    /// Returns an error if the sequence is not formed, a piece cannot be
    /// resolved, or a modification does not fit the content.
    pub fn materialize(&self, resolver: &dyn ContentResolver) -> CoreResult<Vec<u8>> {
        let Self::Formed {
            initial,
            modifications,
        } = self
        else {
            return Err(CoreError::invalid_content_operation(
                "cannot materialize content without an initial value",
            ));
        };

        let mut content = match initial {
            ContentSource::Empty => Vec::new(),
            ContentSource::Data(data) => resolve(data, resolver)?,
            ContentSource::Compacted(id) => resolver.compacted(*id)?,
        };
        for modification in modifications {
            apply(&mut content, modification, resolver)?;
        }
        Ok(content)
    }
}

fn resolve(data: &ContentData, resolver: &dyn ContentResolver) -> CoreResult<Vec<u8>> {
    match data {
        ContentData::Bytes(bytes) => Ok(bytes.clone()),
        ContentData::Payload(payload) => resolver.payload(*payload),
    }
}

fn apply(
    content: &mut Vec<u8>,
    modification: &ContentModification,
    resolver: &dyn ContentResolver,
) -> CoreResult<()> {
    match modification {
        ContentModification::Append(data) => {
            content.extend_from_slice(&resolve(data, resolver)?);
        }
        ContentModification::Replace { offset, data } => {
            let data = resolve(data, resolver)?;
            let start = to_index(*offset)?;
            let end = start
                .checked_add(data.len())
                .filter(|&end| end <= content.len())
                .ok_or_else(|| {
                    CoreError::invalid_content_operation(format!(
                        "replace of {} bytes at {start} outside content of {} bytes",
                        data.len(),
                        content.len()
                    ))
                })?;
            content[start..end].copy_from_slice(&data);
        }
        ContentModification::Overwrite { offset, data } => {
            let data = resolve(data, resolver)?;
            let start = to_index(*offset)?;
            if start > content.len() {
                return Err(CoreError::invalid_content_operation(format!(
                    "overwrite at {start} past content of {} bytes",
                    content.len()
                )));
            }
            let end = start + data.len();
            if end > content.len() {
                content.resize(end, 0);
            }
            content[start..end].copy_from_slice(&data);
        }
    }
    Ok(())
}

fn to_index(offset: u64) -> CoreResult<usize> {
    usize::try_from(offset)
        .map_err(|_| CoreError::invalid_content_operation(format!("offset {offset} too large")))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl ContentResolver for Fixed {
        fn payload(&self, payload: PayloadRef) -> CoreResult<Vec<u8>> {
            Ok(vec![b'p'; payload.length as usize])
        }

        fn compacted(&self, content: ContentId) -> CoreResult<Vec<u8>> {
            Ok(format!("compacted-{}", content.as_u32()).into_bytes())
        }
    }

    fn bytes(s: &str) -> ContentData {
        ContentData::Bytes(s.as_bytes().to_vec())
    }

    #[test]
    fn unformed_sequence_rejects_use() {
        let mut seq = RestorationSequence::default();
        assert!(!seq.is_formed());
        assert!(seq
            .modify(ContentModification::Append(bytes("x")))
            .is_err());
        assert!(seq.materialize(&Fixed).is_err());
    }

    #[test]
    fn modifications_apply_in_order() {
        let mut seq = RestorationSequence::starting_with(ContentSource::Data(bytes("hello")));
        seq.modify(ContentModification::Append(bytes(" world"))).unwrap();
        seq.modify(ContentModification::Replace {
            offset: 0,
            data: bytes("J"),
        })
        .unwrap();
        seq.modify(ContentModification::Overwrite {
            offset: 6,
            data: bytes("there!"),
        })
        .unwrap();

        assert_eq!(seq.materialize(&Fixed).unwrap(), b"Jello there!");
    }

    #[test]
    fn set_discards_modifications() {
        let mut seq = RestorationSequence::starting_with(ContentSource::Empty);
        seq.modify(ContentModification::Append(bytes("abc"))).unwrap();
        seq.set(ContentSource::Compacted(ContentId::new(4)));
        assert_eq!(seq.materialize(&Fixed).unwrap(), b"compacted-4");
    }

    #[test]
    fn payload_pieces_are_resolved() {
        let mut seq = RestorationSequence::starting_with(ContentSource::Empty);
        seq.modify(ContentModification::Append(ContentData::Payload(
            PayloadRef::new(0, 3),
        )))
        .unwrap();
        assert_eq!(seq.materialize(&Fixed).unwrap(), b"ppp");
    }

    #[test]
    fn replace_out_of_bounds_is_rejected() {
        let mut seq = RestorationSequence::starting_with(ContentSource::Data(bytes("abc")));
        seq.modify(ContentModification::Replace {
            offset: 2,
            data: bytes("xy"),
        })
        .unwrap();
        assert!(matches!(
            seq.materialize(&Fixed),
            Err(CoreError::InvalidContentOperation { .. })
        ));
    }

    #[test]
    fn replace_at_huge_offset_is_rejected() {
        let mut seq = RestorationSequence::starting_with(ContentSource::Data(bytes("abc")));
        seq.modify(ContentModification::Replace {
            offset: u64::MAX,
            data: bytes("x"),
        })
        .unwrap();
        assert!(matches!(
            seq.materialize(&Fixed),
            Err(CoreError::InvalidContentOperation { .. })
        ));
    }

    #[test]
    fn overwrite_may_grow_but_not_skip() {
        let mut grow = RestorationSequence::starting_with(ContentSource::Data(bytes("abc")));
        grow.modify(ContentModification::Overwrite {
            offset: 3,
            data: bytes("de"),
        })
        .unwrap();
        assert_eq!(grow.materialize(&Fixed).unwrap(), b"abcde");

        let mut gap = RestorationSequence::starting_with(ContentSource::Data(bytes("abc")));
        gap.modify(ContentModification::Overwrite {
            offset: 4,
            data: bytes("x"),
        })
        .unwrap();
        assert!(gap.materialize(&Fixed).is_err());
    }
}
