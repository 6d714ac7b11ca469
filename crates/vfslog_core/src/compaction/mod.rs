//! Folding operation-log ranges into the compacted VFS state.

mod deltas;
mod model;
mod state;

pub use model::{CompactedVfsModel, CompactionReport};
pub use state::CompactedVfsState;
