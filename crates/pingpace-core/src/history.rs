use std::collections::VecDeque;

/// Most recent latency samples in completion order, oldest evicted first.
#[derive(Debug, Clone)]
pub struct PingHistory {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl PingHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, latency_ms: u64) {
        self.samples.push_back(latency_ms);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Arithmetic mean of the retained samples, `0.0` when empty.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.samples.iter().sum();
        sum as f64 / self.samples.len() as f64
    }

    /// Most recent sample, `0` when empty.
    pub fn latest(&self) -> u64 {
        self.samples.back().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.samples.iter().copied()
    }
}

impl Default for PingHistory {
    fn default() -> Self {
        Self::new(10)
    }
}

impl FromIterator<u64> for PingHistory {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut history = Self::default();
        for sample in iter {
            history.push(sample);
        }
        history
    }
}
