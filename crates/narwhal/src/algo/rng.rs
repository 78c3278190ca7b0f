use nalgebra::Vector3;
use std::hash::Hasher;

/// Seeded xorshift64* generator. Every random draw in the engine goes through one of these so
/// identical inputs always reproduce identical layouts.
#[derive(Debug, Clone)]
pub(crate) struct XorShift64Star {
    state: u64,
}

impl XorShift64Star {
    pub(crate) fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    /// Generator whose stream depends only on `seed` and `key`, not on any other draw.
    pub(crate) fn keyed(seed: u64, key: &str) -> Self {
        let mut h = rustc_hash::FxHasher::default();
        h.write(key.as_bytes());
        let mut rng = Self::new(seed);
        rng.mix_u64(h.finish());
        rng
    }

    pub(crate) fn mix_u64(&mut self, v: u64) {
        // One-way mix to decorrelate keyed streams.
        self.state ^= v.wrapping_mul(0x9E3779B97F4A7C15_u64);
        if self.state == 0 {
            self.state = 1;
        }
        let _ = self.next_u64();
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D_u64)
    }

    pub(crate) fn next_f64_signed(&mut self) -> f64 {
        // Map to [-1, 1) with 53 bits of precision.
        (self.next_f64_unit() * 2.0) - 1.0
    }

    pub(crate) fn next_f64_unit(&mut self) -> f64 {
        let u = self.next_u64() >> 11;
        (u as f64) / ((1u64 << 53) as f64)
    }

    /// Uniform point inside the ball of the given radius.
    pub(crate) fn in_ball(&mut self, radius: f64) -> Vector3<f64> {
        for _ in 0..32 {
            let v = Vector3::new(
                self.next_f64_signed(),
                self.next_f64_signed(),
                self.next_f64_signed(),
            );
            let n2 = v.norm_squared();
            if n2 <= 1.0 && n2 > 1e-12 {
                return v * radius;
            }
        }
        Vector3::new(radius * 0.5, 0.0, 0.0)
    }

    /// Random unit vector, used to separate coincident points.
    pub(crate) fn unit_vector(&mut self) -> Vector3<f64> {
        let v = self.in_ball(1.0);
        v / v.norm()
    }
}
