use std::collections::BTreeSet;

use rand::prelude::*;

use crate::frame::Frame;

/// Corruption oracle consulted for every frame arriving at a receiver.
///
/// A corrupt verdict drops the frame before any protocol processing; no
/// acknowledgment is generated for it.
pub trait ErrorModel {
    /// Whether the inbound `frame` arrives corrupt.
    fn is_corrupt(&mut self, frame: &Frame) -> bool;
}

/// Marks frames corrupt independently with a fixed probability, ignoring
/// frame size.
pub struct RateErrorModel {
    rate: f64,
    rng: StdRng,
}

impl RateErrorModel {
    /// Creates a model with corruption probability `rate`, OS-seeded.
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Creates a reproducible model for a given seed.
    pub fn with_seed(rate: f64, seed: u64) -> Self {
        Self {
            rate,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ErrorModel for RateErrorModel {
    fn is_corrupt(&mut self, _frame: &Frame) -> bool {
        self.rate > 0.0 && self.rng.random::<f64>() < self.rate
    }
}

/// Gilbert-Elliot burst model.
///
/// Two-state Markov chain: frames are corrupted with a low probability in
/// the good state and a high one in the bad state, and the state advances
/// once per frame.
pub struct GilbertElliotErrorModel {
    good: bool,
    good_loss: f64,
    bad_loss: f64,
    good_to_bad: f64,
    bad_to_good: f64,
    rng: StdRng,
}

impl GilbertElliotErrorModel {
    /// Creates a model with per-frame loss probabilities for the good and
    /// bad states and the two transition probabilities.
    pub fn new(good_loss: f64, bad_loss: f64, good_to_bad: f64, bad_to_good: f64) -> Self {
        Self::with_seed(good_loss, bad_loss, good_to_bad, bad_to_good, {
            let mut seed_rng = StdRng::from_os_rng();
            seed_rng.random()
        })
    }

    /// Creates a reproducible model for a given seed.
    pub fn with_seed(
        good_loss: f64,
        bad_loss: f64,
        good_to_bad: f64,
        bad_to_good: f64,
        seed: u64,
    ) -> Self {
        Self {
            good: true,
            good_loss,
            bad_loss,
            good_to_bad,
            bad_to_good,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ErrorModel for GilbertElliotErrorModel {
    fn is_corrupt(&mut self, _frame: &Frame) -> bool {
        let loss = if self.good {
            self.good_loss
        } else {
            self.bad_loss
        };
        let corrupt = self.rng.random::<f64>() < loss;

        let transition = if self.good {
            self.good_to_bad
        } else {
            self.bad_to_good
        };
        if self.rng.random::<f64>() < transition {
            self.good = !self.good;
        }

        corrupt
    }
}

/// Deterministically corrupts the nth arrivals (0-based) at this receiver.
///
/// Reproducible loss placement for tests and fault-injection scenarios.
#[derive(Default)]
pub struct ListErrorModel {
    drops: BTreeSet<u64>,
    seen: u64,
}

impl ListErrorModel {
    /// Creates a model dropping the arrivals whose indexes are listed.
    pub fn new(drops: impl IntoIterator<Item = u64>) -> Self {
        Self {
            drops: drops.into_iter().collect(),
            seen: 0,
        }
    }

    /// Number of frames inspected so far.
    pub fn seen(&self) -> u64 {
        self.seen
    }
}

impl ErrorModel for ListErrorModel {
    fn is_corrupt(&mut self, _frame: &Frame) -> bool {
        let index = self.seen;
        self.seen += 1;
        self.drops.remove(&index)
    }
}
