//! Values held by the compacted storages.
//!
//! - [`FileModel`]: one fixed-size record per file ID
//! - [`AttributesMap`]: the attribute list of one file
//! - [`RestorationSequence`]: how to rebuild one content record

mod attributes;
mod content;
mod file;

pub use attributes::{AttributesMap, AttributesUpdate};
pub use content::{
    ContentData, ContentModification, ContentResolver, ContentSource, RestorationSequence,
};
pub use file::FileModel;
