use std::collections::VecDeque;

/// Fixed-window rolling mean over the most recent `cap` samples.
///
/// The facility controller smooths induction-matrix charge and flow
/// readings over a 20-sample window before they reach the PID loop.
#[derive(Debug, Clone)]
pub struct RollingMean {
    buf: VecDeque<f64>,
    cap: usize,
    sum: f64,
}

impl RollingMean {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(cap.max(1)),
            cap: cap.max(1),
            sum: 0.0,
        }
    }

    pub fn push(&mut self, sample: f64) {
        if self.buf.len() == self.cap
            && let Some(oldest) = self.buf.pop_front()
        {
            self.sum -= oldest;
        }
        self.buf.push_back(sample);
        self.sum += sample;
    }

    /// Arithmetic mean of the retained samples; zero when empty.
    pub fn mean(&self) -> f64 {
        if self.buf.is_empty() {
            return 0.0;
        }
        self.sum / self.buf.len() as f64
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.sum = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_over_partial_window() {
        let mut m = RollingMean::new(20);
        m.push(1.0);
        m.push(2.0);
        m.push(3.0);
        assert!((m.mean() - 2.0).abs() < 1e-12);
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn window_evicts_oldest() {
        let mut m = RollingMean::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            m.push(v);
        }
        // Window now holds 2, 3, 4.
        assert!((m.mean() - 3.0).abs() < 1e-12);
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn matches_arithmetic_mean_of_last_n() {
        let mut m = RollingMean::new(20);
        let samples: Vec<f64> = (0..50).map(|i| i as f64 * 0.5).collect();
        for &s in &samples {
            m.push(s);
        }
        let tail = &samples[30..];
        let expect = tail.iter().sum::<f64>() / tail.len() as f64;
        assert!((m.mean() - expect).abs() < 1e-9);
    }
}
