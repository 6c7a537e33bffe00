//! Rolling indicators over one symbol's close series.
//!
//! Values are `None` until their window has filled; they are never zero-filled.

use ta::indicators::SimpleMovingAverage;
use ta::Next;

/// Moving-average windows, shortest first.
pub const MA_WINDOWS: [usize; 6] = [5, 10, 20, 30, 60, 120];

/// Simple moving average of `values`, `None` until `period` values were seen.
pub fn rolling_sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let Ok(mut sma) = SimpleMovingAverage::new(period) else {
        return vec![None; values.len()];
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let avg = sma.next(value);
            (i + 1 >= period).then_some(avg)
        })
        .collect()
}

/// Spread of the short and medium averages, in percent:
/// `(max / min - 1) * 100` over ma5..ma60.
///
/// `None` if any average is undefined or the minimum is not positive.
pub fn convergence(averages: &[Option<f64>]) -> Option<f64> {
    let values = averages.iter().copied().collect::<Option<Vec<f64>>>()?;
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);

    if values.is_empty() || min <= 0.0 {
        return None;
    }
    Some((max / min - 1.0) * 100.0)
}

/// Every indicator for one symbol, index-aligned with its observations.
#[derive(Debug, Clone, Default)]
pub struct RollingIndicatorSet {
    pub ma5: Vec<Option<f64>>,
    pub ma10: Vec<Option<f64>>,
    pub ma20: Vec<Option<f64>>,
    pub ma30: Vec<Option<f64>>,
    pub ma60: Vec<Option<f64>>,
    pub ma120: Vec<Option<f64>>,
    pub convergence: Vec<Option<f64>>,
}

impl RollingIndicatorSet {
    /// Compute from closes ordered oldest first.
    pub fn compute(closes: &[f64]) -> Self {
        let [ma5, ma10, ma20, ma30, ma60, ma120] = MA_WINDOWS.map(|w| rolling_sma(closes, w));

        let convergence = (0..closes.len())
            .map(|i| convergence(&[ma5[i], ma10[i], ma20[i], ma30[i], ma60[i]]))
            .collect();

        Self {
            ma5,
            ma10,
            ma20,
            ma30,
            ma60,
            ma120,
            convergence,
        }
    }

    pub fn len(&self) -> usize {
        self.convergence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.convergence.is_empty()
    }
}
