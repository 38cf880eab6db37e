//! Bernoulli sampling, deterministic per witness id so retries and
//! re-runs of the same witness always land on the same keep/drop side.

use std::hash::{Hash, Hasher};

pub struct Sampler {
    rate: f64,
}

impl Sampler {
    pub fn new(rate: f64) -> Self {
        Sampler { rate: rate.clamp(0.0, 1.0) }
    }

    pub fn should_keep(&self, id: uuid::Uuid) -> bool {
        if self.rate >= 1.0 {
            return true;
        }
        if self.rate <= 0.0 {
            return false;
        }
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        id.hash(&mut hasher);
        let draw = (hasher.finish() as f64) / (u64::MAX as f64);
        draw < self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_one_keeps_everything() {
        let s = Sampler::new(1.0);
        assert!(s.should_keep(uuid::Uuid::new_v4()));
    }

    #[test]
    fn rate_zero_drops_everything() {
        let s = Sampler::new(0.0);
        assert!(!s.should_keep(uuid::Uuid::new_v4()));
    }

    #[test]
    fn same_id_always_draws_the_same_side() {
        let s = Sampler::new(0.5);
        let id = uuid::Uuid::new_v4();
        assert_eq!(s.should_keep(id), s.should_keep(id));
    }
}
