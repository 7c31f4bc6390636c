//! Per-edge sample ring and least-squares trend.

use std::collections::VecDeque;

/// Direction of an edge's congestion level over its recent samples.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Trend {
    Increasing,
    Stable,
    Decreasing,
}

impl Trend {
    /// Classify a slope (level per second) with a symmetric dead band.
    pub fn from_slope(slope: f64, dead_band: f64) -> Trend {
        if slope > dead_band {
            Trend::Increasing
        } else if slope < -dead_band {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Trend::Increasing => "increasing",
            Trend::Stable     => "stable",
            Trend::Decreasing => "decreasing",
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-size ring of `(timestamp_secs, level)` samples.
#[derive(Clone, Debug, Default)]
pub(crate) struct SampleRing {
    buf: VecDeque<(u64, f64)>,
    cap: usize,
}

impl SampleRing {
    pub(crate) fn new(cap: usize) -> Self {
        Self { buf: VecDeque::with_capacity(cap), cap: cap.max(2) }
    }

    pub(crate) fn push(&mut self, t: u64, level: f64) {
        if self.buf.len() == self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back((t, level));
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    /// Least-squares slope of level against time, in level per second.
    ///
    /// Zero with fewer than two samples or when every sample shares one
    /// timestamp.
    pub(crate) fn slope(&self) -> f64 {
        let n = self.buf.len();
        if n < 2 {
            return 0.0;
        }
        let t0 = self.buf[0].0 as f64;
        let nf = n as f64;
        let mean_x = self.buf.iter().map(|&(t, _)| t as f64 - t0).sum::<f64>() / nf;
        let mean_y = self.buf.iter().map(|&(_, y)| y).sum::<f64>() / nf;
        let (mut sxy, mut sxx) = (0.0, 0.0);
        for &(t, y) in &self.buf {
            let dx = t as f64 - t0 - mean_x;
            sxy += dx * (y - mean_y);
            sxx += dx * dx;
        }
        if sxx == 0.0 { 0.0 } else { sxy / sxx }
    }
}
