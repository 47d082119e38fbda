use rand_core::RngCore;

/// Software PRNG for boards without a hardware entropy source.
///
/// Must be seeded from a real random value (e.g. the radio's wideband RSSI
/// reader); reusing a seed reuses DevNonces and opens the join exchange to
/// replay.
pub struct Prng(fastrand::Rng);

impl Prng {
    pub fn new(seed: u64) -> Self {
        Self(fastrand::Rng::with_seed(seed))
    }
}

impl RngCore for Prng {
    fn next_u32(&mut self) -> u32 {
        self.0.u32(..)
    }

    fn next_u64(&mut self) -> u64 {
        self.0.u64(..)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.0.fill(dest);
        Ok(())
    }
}
