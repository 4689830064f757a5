use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ProberConfig {
    pub warmup: Duration,
    pub normal_interval: Duration,
    pub fast_interval: Duration,
    pub history_capacity: usize,
    /// A sample counts as a spike when it is strictly above `spike_factor * avg`.
    pub spike_factor: f64,
    /// `None` waits for an acknowledgment forever; an unanswered ping then
    /// stalls the prober.
    pub ack_timeout: Option<Duration>,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            warmup: Duration::from_millis(3000),
            normal_interval: Duration::from_millis(5000),
            fast_interval: Duration::from_millis(1000),
            history_capacity: 10,
            spike_factor: 2.0,
            ack_timeout: None,
        }
    }
}
