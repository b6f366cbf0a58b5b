use thiserror::Error;

/// Errors the index can raise. These never cross the wire directly; the
/// daemon's dispatcher maps them onto the wire-visible error taxonomy.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("key length {len} exceeds the {max}-byte limit")]
    KeyTooLong { len: usize, max: usize },

    #[error("requested capacity {requested} overflows a table allocation")]
    CapacityOverflow { requested: usize },
}
