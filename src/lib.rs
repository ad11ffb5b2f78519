//! hashmap-engines: two single-threaded hash map engines behind one
//! [`Map`] contract.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: two self-contained storage strategies that can be swapped
//!   behind the same map operations and compared against each other.
//! - Engines:
//!   - BucketingMap<K, V, S>: separate chaining over an array of lazily
//!     allocated chains. Grows by `scaling_factor` once the entry count
//!     exceeds `load_factor` of an estimated capacity in which every
//!     bucket counts for at least `preferred_bucket_size` entries.
//!   - RecursiveMap<K, V, S>: each bucket is `Empty`, `Single(entry)` or
//!     `Nested(child)`. A collision promotes the bucket to a child table
//!     one level deeper, which slots keys with
//!     `floor(code * π * depth) mod bucket_count`. Removing down to one
//!     entry collapses the child back into `Single`.
//!
//! Constraints
//! - Single-threaded, unsynchronized; callers needing sharing across
//!   threads wrap a map in their own lock.
//! - Every operation runs to completion; nothing blocks or retries.
//! - Keys supply `Eq + Hash`; the hash must stay stable while the key is
//!   in the map.
//! - No ordering guarantee for iteration or snapshots.
//!
//! Hasher and rehashing invariants
//! - Each entry stores the hash computed at insertion. BucketingMap
//!   resizes from the stored 64-bit hash; RecursiveMap promotes and
//!   collapses from a stored 32-bit code folded from it. `K: Hash` runs
//!   once per public call, never during restructuring.
//!
//! Failure boundaries
//! - Bad configuration is rejected at construction with [`ConfigError`].
//! - Absent keys are `None`, never errors.
//! - RecursiveMap cannot separate unequal keys whose codes share a slot at
//!   every depth. Identical codes always do, and because the slot depends
//!   only on `code * π mod bucket_count`, so do distinct codes that land
//!   close together there. Instead of nesting without bound it checks,
//!   before touching the table, that some depth up to `max_depth` splits
//!   the pair, and otherwise fails with [`InsertError::DegenerateCollision`],
//!   leaving the map unchanged. With the defaults this starts happening
//!   after a few hundred random keys at most, so `put` errors are an
//!   ordinary outcome, not a bug signal. `max_depth` is capped at
//!   [`MAX_DEPTH_LIMIT`] to bound the cost of that check.
//!
//! Notes
//! - `put` returns a reference to the value just stored. On overwrite
//!   that is the new value; the replaced value is dropped.
//! - `clear()` returns a map to its configured bucket count.
//! - Restructuring (resize, promotion, collapse, degenerate collisions) is
//!   reported through the `log` facade; install any logger to see it.

pub mod bucketing_map;
mod error;
pub mod hashing;
mod map;
mod map_proptest;
pub mod recursive_map;

// Public surface
pub use bucketing_map::{BucketingConfig, BucketingMap};
pub use error::{ConfigError, InsertError};
pub use hashing::IdentityBuildHasher;
pub use map::Map;
pub use recursive_map::{RecursiveConfig, RecursiveMap, MAX_DEPTH_LIMIT};
