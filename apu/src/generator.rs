//! Default random generator of the accelerator.
//!
//! The generator is a single process-wide resource owned by the hooks provider.
//! Handles are cheap clones of the same shared state. Callers must hold the lock
//! only while reading or mutating the seed, never across a device call.

use crate::mutex::{Mutex, MutexGuard};
use crate::rng::Rng;
use std::sync::Arc;

/// Seed used by generators that were never seeded manually
pub const DEFAULT_SEED: u64 = 67_280_421_310_721;

#[cfg_attr(feature = "py", pyo3::pyclass(name = "Generator", module = "apu", frozen))]
#[derive(Debug, Clone)]
pub struct Generator {
    state: Arc<Mutex<GeneratorState, 1_000_000>>,
}

/// Generator state, accessed through [`Generator::lock`]
#[derive(Debug)]
pub struct GeneratorState {
    seed: u64,
    rng: Rng,
}

impl Generator {
    #[must_use]
    pub fn new(seed: u64) -> Generator {
        Generator { state: Arc::new(Mutex::new(GeneratorState { seed, rng: Rng::seed_from_u64(seed) })) }
    }

    /// Acquires the generator lock. Keep the guard alive only for the seed mutation.
    pub fn lock(&self) -> MutexGuard<'_, GeneratorState> {
        self.state.lock()
    }

    #[must_use]
    pub fn current_seed(&self) -> u64 {
        self.lock().current_seed()
    }

    /// Same as [`Generator::current_seed`], named after the seed the stream started from
    #[must_use]
    pub fn initial_seed(&self) -> u64 {
        self.current_seed()
    }

    pub fn manual_seed(&self, seed: u64) {
        self.lock().set_current_seed(seed);
    }

    /// Reseeds from a nondeterministic source and returns the new seed
    pub fn seed(&self) -> u64 {
        let seed = nondeterministic_seed();
        self.lock().set_current_seed(seed);
        seed
    }

    pub fn next_u64(&self) -> u64 {
        self.lock().next_u64()
    }

    /// Whether both handles refer to the same generator
    #[must_use]
    pub fn same_as(&self, other: &Generator) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl GeneratorState {
    #[must_use]
    pub const fn current_seed(&self) -> u64 {
        self.seed
    }

    pub fn set_current_seed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = Rng::seed_from_u64(seed);
    }

    pub fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }
}

fn nondeterministic_seed() -> u64 {
    use std::hash::{BuildHasher, Hasher};
    let mut hasher = std::collections::hash_map::RandomState::new().build_hasher();
    if let Ok(now) = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        hasher.write_u128(now.as_nanos());
    }
    hasher.write_u32(std::process::id());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::Generator;

    #[test]
    fn manual_seed_resets_stream() {
        let generator = Generator::new(7);
        let first = generator.next_u64();
        generator.next_u64();
        generator.manual_seed(7);
        assert_eq!(generator.current_seed(), 7);
        assert_eq!(generator.next_u64(), first);
    }

    #[test]
    fn clones_share_state() {
        let a = Generator::new(1);
        let b = a.clone();
        b.manual_seed(99);
        assert_eq!(a.current_seed(), 99);
        assert!(a.same_as(&b));
        assert!(!a.same_as(&Generator::new(99)));
    }

    #[test]
    fn seed_returns_the_new_seed() {
        let generator = Generator::new(1);
        let seed = generator.seed();
        assert_eq!(generator.initial_seed(), seed);
    }
}
