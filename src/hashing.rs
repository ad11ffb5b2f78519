//! Hash helpers shared by both engines.

use core::hash::{BuildHasher, Hasher};
use fnv::FnvHasher;

/// Fold a 64-bit hash into the 32-bit hash code used by the recursive
/// engine's depth-scaled slot formula.
#[inline]
pub(crate) fn hash_code(hash: u64) -> u32 {
    (hash ^ (hash >> 32)) as u32
}

/// `BuildHasher` whose hash of an integer key is the integer itself.
///
/// Bucket placement then follows directly from the key value, which makes
/// layouts reproducible across runs. Byte input (strings) and composite keys
/// go through FNV-1a instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityBuildHasher;

impl BuildHasher for IdentityBuildHasher {
    type Hasher = IdentityHasher;

    fn build_hasher(&self) -> Self::Hasher {
        IdentityHasher::default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
enum State {
    #[default]
    Fresh,
    Identity(u64),
    // Running FNV-1a state.
    Mixed(u64),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityHasher {
    state: State,
}

impl IdentityHasher {
    fn feed(&mut self, bytes: &[u8]) {
        let mut fnv = match self.state {
            State::Fresh => FnvHasher::default(),
            State::Identity(v) => {
                let mut fnv = FnvHasher::default();
                fnv.write(&v.to_le_bytes());
                fnv
            }
            State::Mixed(h) => FnvHasher::with_key(h),
        };
        fnv.write(bytes);
        self.state = State::Mixed(fnv.finish());
    }

    #[inline]
    fn set(&mut self, v: u64) {
        match self.state {
            State::Fresh => self.state = State::Identity(v),
            _ => self.feed(&v.to_le_bytes()),
        }
    }
}

impl Hasher for IdentityHasher {
    fn write(&mut self, bytes: &[u8]) {
        self.feed(bytes);
    }

    fn write_u8(&mut self, i: u8) {
        self.set(u64::from(i));
    }
    fn write_u16(&mut self, i: u16) {
        self.set(u64::from(i));
    }
    fn write_u32(&mut self, i: u32) {
        self.set(u64::from(i));
    }
    fn write_u64(&mut self, i: u64) {
        self.set(i);
    }
    fn write_usize(&mut self, i: usize) {
        self.set(i as u64);
    }
    fn write_i8(&mut self, i: i8) {
        self.set(i as u64);
    }
    fn write_i16(&mut self, i: i16) {
        self.set(i as u64);
    }
    fn write_i32(&mut self, i: i32) {
        self.set(i as u64);
    }
    fn write_i64(&mut self, i: i64) {
        self.set(i as u64);
    }
    fn write_isize(&mut self, i: isize) {
        self.set(i as u64);
    }

    fn finish(&self) -> u64 {
        match self.state {
            State::Fresh => 0,
            State::Identity(v) | State::Mixed(v) => v,
        }
    }
}
