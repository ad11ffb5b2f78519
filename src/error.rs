//! Error types for construction and insertion.

use thiserror::Error;

/// Rejected configuration. Raised only by constructors and
/// `validate()`; never by a runtime operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("bucket count must be greater than 0")]
    ZeroBucketCount,
    #[error("scaling factor must be greater than 1, got {0}")]
    ScalingFactorTooSmall(usize),
    #[error("preferred bucket size must be greater than 0")]
    ZeroPreferredBucketSize,
    #[error("load factor must be a number in (0, 1], got {0}")]
    LoadFactorOutOfRange(f64),
    #[error("max depth must be at least 1")]
    ZeroMaxDepth,
    #[error("max depth must be at most {}, got {0}", crate::recursive_map::MAX_DEPTH_LIMIT)]
    MaxDepthTooLarge(usize),
}

/// Failure of `RecursiveMap::put`. The map is left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InsertError {
    /// Two unequal keys land in the same slot at every depth from `depth`
    /// down to `max_depth`, so no amount of nesting separates them.
    #[error("degenerate collision: keys still share a slot from depth {depth} through max depth {max_depth}")]
    DegenerateCollision { depth: usize, max_depth: usize },
}
