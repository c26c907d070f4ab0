//! Xoshiro256++ seeded through SplitMix64, adapted from rand-core.
//! Copyright 2018 Developers of the Rand project.

/// Random number generator backing the default APU generator
#[derive(Debug, Clone)]
pub(crate) struct Rng {
    s: [u64; 4],
}

impl Rng {
    pub(crate) const fn seed_from_u64(mut state: u64) -> Self {
        const PHI: u64 = 0x9e37_79b9_7f4a_7c15;
        const A: u64 = 0xbf58_476d_1ce4_e5b9;
        const B: u64 = 0x94d0_49bb_1331_11eb;

        let mut s = [0; 4];
        let mut i = 0;
        while i < 4 {
            state = state.wrapping_add(PHI);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(A);
            z = (z ^ (z >> 27)).wrapping_mul(B);
            s[i] = z ^ (z >> 31);
            i += 1;
        }
        // Non-zero PHI guarantees non-zero state
        Self { s }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        let res = self.s[0].wrapping_add(self.s[3]).rotate_left(23).wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;

        self.s[3] = self.s[3].rotate_left(45);

        res
    }
}
