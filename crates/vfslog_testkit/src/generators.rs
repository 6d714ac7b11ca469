//! Property-based test generators using proptest.
//!
//! Strategies produce edit scripts that are always valid for the content
//! they are applied to, together with the value the script must produce.

use crate::fixtures::TestEngine;
use proptest::prelude::*;
use vfslog_core::{AttributeKey, ContentId, FileId};

/// Strategy for content bytes.
pub fn content_bytes_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for attribute keys from a small key space, so scripts write the
/// same key repeatedly.
pub fn attribute_key_strategy() -> impl Strategy<Value = AttributeKey> {
    (0u32..6, 0u16..2, any::<bool>()).prop_map(|(id, version, fixed)| {
        AttributeKey::new(id, version, fixed)
    })
}

/// One edit of a content record.
///
/// Offsets are fractions of the current length, so an edit stays valid
/// whatever the edits before it did.
#[derive(Debug, Clone)]
pub enum ContentEdit {
    /// Replace the whole value.
    Set(Vec<u8>),
    /// Append bytes.
    Append(Vec<u8>),
    /// Replace an in-bounds range.
    Replace {
        /// Start as a fraction of the current length, in 1/255ths.
        at: u8,
        /// Replacement bytes, cut to fit.
        data: Vec<u8>,
    },
    /// Write at an offset up to the current length, possibly growing.
    Overwrite {
        /// Offset as a fraction of the current length, in 1/255ths.
        at: u8,
        /// Written bytes.
        data: Vec<u8>,
    },
}

fn scaled(at: u8, len: usize) -> usize {
    len * usize::from(at) / 255
}

impl ContentEdit {
    /// Writes this edit for `content` to the log and applies it to
    /// `expected`.
    pub fn write(&self, engine: &TestEngine, content: ContentId, expected: &mut Vec<u8>) {
        match self {
            Self::Set(data) => {
                engine.set_content(content, data);
                expected.clone_from(data);
            }
            Self::Append(data) => {
                engine.append_content(content, data);
                expected.extend_from_slice(data);
            }
            Self::Replace { at, data } => {
                let start = scaled(*at, expected.len());
                let len = data.len().min(expected.len() - start);
                let data = &data[..len];
                engine.replace_content(content, start as u64, data);
                expected[start..start + len].copy_from_slice(data);
            }
            Self::Overwrite { at, data } => {
                let start = scaled(*at, expected.len());
                engine.overwrite_content(content, start as u64, data);
                let end = start + data.len();
                if end > expected.len() {
                    expected.resize(end, 0);
                }
                expected[start..end].copy_from_slice(data);
            }
        }
    }
}

/// Strategy for a single content edit.
pub fn content_edit_strategy() -> impl Strategy<Value = ContentEdit> {
    let small = || prop::collection::vec(any::<u8>(), 0..48);
    prop_oneof![
        1 => content_bytes_strategy().prop_map(ContentEdit::Set),
        3 => small().prop_map(ContentEdit::Append),
        3 => (any::<u8>(), small()).prop_map(|(at, data)| ContentEdit::Replace { at, data }),
        3 => (any::<u8>(), small()).prop_map(|(at, data)| ContentEdit::Overwrite { at, data }),
    ]
}

/// A content record's initial value and the edits applied to it.
#[derive(Debug, Clone)]
pub struct ContentScript {
    /// Value the content is created with.
    pub initial: Vec<u8>,
    /// Edits in log order.
    pub edits: Vec<ContentEdit>,
}

impl ContentScript {
    /// Creates the content on `file` and writes the initial value and all
    /// edits. Returns the content ID and its expected final value.
    pub fn write(&self, engine: &TestEngine, file: FileId) -> (ContentId, Vec<u8>) {
        let content = engine.create_content(file, &self.initial);
        let mut expected = self.initial.clone();
        for edit in &self.edits {
            edit.write(engine, content, &mut expected);
        }
        (content, expected)
    }

    /// Writes the edits only, continuing from `expected`.
    pub fn write_edits(&self, engine: &TestEngine, content: ContentId, expected: &mut Vec<u8>) {
        for edit in &self.edits {
            edit.write(engine, content, expected);
        }
    }
}

/// Strategy for content scripts of up to `max_edits` edits.
pub fn content_script_strategy(max_edits: usize) -> impl Strategy<Value = ContentScript> {
    (
        content_bytes_strategy(),
        prop::collection::vec(content_edit_strategy(), 0..=max_edits),
    )
        .prop_map(|(initial, edits)| ContentScript { initial, edits })
}

/// One attribute operation.
#[derive(Debug, Clone)]
pub enum AttributeEdit {
    /// Write a value.
    Write(AttributeKey, Vec<u8>),
    /// Delete all attributes.
    Clear,
}

impl AttributeEdit {
    /// Writes this edit for `file` to the log and applies it to `expected`,
    /// a list of `(compressed key, value)` pairs in write order.
    pub fn write(&self, engine: &TestEngine, file: FileId, expected: &mut Vec<(i64, Vec<u8>)>) {
        match self {
            Self::Write(key, value) => {
                engine.write_attribute(file, *key, value);
                let key = key.compress();
                expected.retain(|(k, _)| *k != key);
                expected.push((key, value.clone()));
            }
            Self::Clear => {
                engine.clear_attributes(file);
                expected.clear();
            }
        }
    }
}

/// Strategy for attribute edit sequences.
pub fn attribute_edits_strategy(max_edits: usize) -> impl Strategy<Value = Vec<AttributeEdit>> {
    let edit = prop_oneof![
        6 => (attribute_key_strategy(), prop::collection::vec(any::<u8>(), 0..16))
            .prop_map(|(key, value)| AttributeEdit::Write(key, value)),
        1 => Just(AttributeEdit::Clear),
    ];
    prop::collection::vec(edit, 0..=max_edits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn scaled_offsets_stay_in_bounds() {
        assert_eq!(scaled(0, 10), 0);
        assert_eq!(scaled(255, 10), 10);
        assert!(scaled(128, 10) <= 10);
        assert_eq!(scaled(200, 0), 0);
    }

    #[test]
    fn scripts_generate() {
        let mut runner = TestRunner::default();
        for _ in 0..10 {
            let script = content_script_strategy(8)
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert!(script.edits.len() <= 8);
        }
    }
}
