//! Admission statistics for simulated producers.

/// How long producers were held inside `refresh`, and how often they were
/// turned away.
#[derive(Debug, Clone, Default)]
pub struct AdmissionStats {
    /// Requests that returned an identifier.
    pub admitted: u64,
    /// Requests the recorder refused.
    pub rejected: u64,
    /// Time spent inside `refresh` per admitted request, in microseconds.
    waits_us: Vec<u64>,
}

impl AdmissionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admitted(&mut self, wait_us: u64) {
        self.admitted += 1;
        self.waits_us.push(wait_us);
    }

    pub fn rejected(&mut self) {
        self.rejected += 1;
    }

    /// Nearest-rank quantile of the admission waits, `q` in `(0, 1]`.
    pub fn quantile_us(&self, q: f64) -> u64 {
        if self.waits_us.is_empty() {
            return 0;
        }

        let mut sorted = self.waits_us.clone();
        sorted.sort_unstable();

        let rank = (q * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    }

    pub fn max_us(&self) -> u64 {
        self.waits_us.iter().copied().max().unwrap_or(0)
    }
}
