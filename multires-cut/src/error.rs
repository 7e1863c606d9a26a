//! Error types for multires-cut

use thiserror::Error;

/// Errors raised by renderer slot management and cut consistency checks.
///
/// These are programmer errors, not runtime conditions: the library logs
/// them and refuses the mutation rather than silently repairing state.
#[derive(Error, Debug)]
pub enum CutError {
    #[error("vertex slot {slot} freed with use count {uses}")]
    SlotInUse { slot: usize, uses: u32 },

    #[error("consistency error: {0}")]
    Consistency(String),
}

/// Result type alias for multires-cut operations
pub type Result<T> = std::result::Result<T, CutError>;
