use rand::Rng;

/// Fixed-capacity uniform sample of a latency stream (Algorithm R).
///
/// The first `capacity` values are kept as-is; after that the n-th value
/// replaces a random slot with probability `capacity / n`, so every value
/// seen so far is equally likely to be in the sample.
#[derive(Debug, Clone)]
pub struct Reservoir {
    capacity: usize,
    seen: u64,
    samples: Vec<u64>,
}

impl Reservoir {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            seen: 0,
            samples: Vec::with_capacity(capacity),
        }
    }

    pub fn insert<R: Rng>(&mut self, value: u64, rng: &mut R) {
        self.seen += 1;

        if self.samples.len() < self.capacity {
            self.samples.push(value);
            return;
        }

        let slot = rng.gen_range(0..self.seen);
        if (slot as usize) < self.capacity {
            self.samples[slot as usize] = value;
        }
    }

    /// Sorted copy of the current sample, ready for rank queries.
    pub fn sorted(&self) -> Vec<u64> {
        let mut out = self.samples.clone();
        out.sort_unstable();
        out
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Total number of values offered, including the ones not retained.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
