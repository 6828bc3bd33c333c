use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::logging::log_babble;
use crate::narsese::ActionToken;

/// Random fallback used when the reasoner derives nothing.
///
/// The budget is consumed one unit per fired babble and never replenished;
/// once it hits zero the selector returns `None` forever.
#[derive(Debug, Clone)]
pub struct BabblingSelector {
    remaining: u32,
    chance: f64,
    rng: StdRng,
}

impl BabblingSelector {
    pub fn new(remaining: u32, chance: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            remaining,
            chance: chance.clamp(0.0, 1.0),
            rng,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn chance(&self) -> f64 {
        self.chance
    }

    pub fn try_select(&mut self, candidates: &[ActionToken]) -> Option<ActionToken> {
        let draw: f64 = self.rng.gen();
        if draw >= self.chance || self.remaining == 0 || candidates.is_empty() {
            log_babble(None, self.remaining);
            return None;
        }
        self.remaining -= 1;
        let picked = candidates.choose(&mut self.rng).copied();
        log_babble(picked.map(|t| t.wire()), self.remaining);
        picked
    }
}
