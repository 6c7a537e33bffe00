//! The breakout rule: six conditions evaluated on one observation.
//!
//! | Condition | Meaning |
//! |-----------|---------|
//! | Convergence | ma5..ma60 spread < 3% on ≥ 10 of the last 15 observations |
//! | Rise | close > 5% above the previous close |
//! | VolumeSurge | volume > 1.5 × previous observation's volume |
//! | MaBreakout | bullish candle crossing 2, 3 or 4 averages |
//! | TurnoverBand | 2% ≤ turnover ratio ≤ 5% |
//! | GoldenCross | ma60 crosses above ma120 |

use serde::{Deserialize, Serialize};

use super::indicators::RollingIndicatorSet;
use crate::data::DailySnapshotRow;

pub const CONVERGENCE_THRESHOLD: f64 = 3.0;
pub const CONVERGENCE_LOOKBACK: usize = 15;
pub const CONVERGENCE_MIN_DAYS: usize = 10;
pub const MIN_RISE_RATIO: f64 = 0.05;
pub const VOLUME_SURGE_FACTOR: f64 = 1.5;
pub const TURNOVER_MIN: f64 = 2.0;
pub const TURNOVER_MAX: f64 = 5.0;

/// One condition of the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Convergence,
    Rise,
    VolumeSurge,
    MaBreakout,
    TurnoverBand,
    GoldenCross,
}

impl Condition {
    pub const ALL: [Condition; 6] = [
        Self::Convergence,
        Self::Rise,
        Self::VolumeSurge,
        Self::MaBreakout,
        Self::TurnoverBand,
        Self::GoldenCross,
    ];
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Convergence => write!(f, "均线粘合"),
            Self::Rise => write!(f, "大涨"),
            Self::VolumeSurge => write!(f, "放量"),
            Self::MaBreakout => write!(f, "阳线穿均线"),
            Self::TurnoverBand => write!(f, "换手率"),
            Self::GoldenCross => write!(f, "长期金叉"),
        }
    }
}

/// Which conditions held on one observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConditionSet {
    pub convergence: bool,
    pub rise: bool,
    pub volume_surge: bool,
    pub ma_breakout: bool,
    pub turnover_band: bool,
    pub golden_cross: bool,
}

impl ConditionSet {
    pub fn get(&self, condition: Condition) -> bool {
        match condition {
            Condition::Convergence => self.convergence,
            Condition::Rise => self.rise,
            Condition::VolumeSurge => self.volume_surge,
            Condition::MaBreakout => self.ma_breakout,
            Condition::TurnoverBand => self.turnover_band,
            Condition::GoldenCross => self.golden_cross,
        }
    }

    /// All six conditions hold.
    pub fn qualifies(&self) -> bool {
        Condition::ALL.iter().all(|c| self.get(*c))
    }
}

/// Evaluate the rule at observation `i` of one symbol's series.
///
/// `rows` are ordered oldest first and aligned with `indicators`.
pub fn evaluate(rows: &[&DailySnapshotRow], indicators: &RollingIndicatorSet, i: usize) -> ConditionSet {
    if i >= rows.len() || i >= indicators.len() {
        return ConditionSet::default();
    }

    let row = rows[i];
    let prev = i.checked_sub(1);

    ConditionSet {
        convergence: converged(indicators, i),
        rise: row.day_change_ratio().is_some_and(|r| r > MIN_RISE_RATIO),
        volume_surge: prev.is_some_and(|p| row.volume > rows[p].volume * VOLUME_SURGE_FACTOR),
        ma_breakout: ma_breakout(row, indicators, i),
        turnover_band: (TURNOVER_MIN..=TURNOVER_MAX).contains(&row.turnover_ratio),
        golden_cross: prev.is_some_and(|p| golden_cross(indicators, p, i)),
    }
}

fn converged(indicators: &RollingIndicatorSet, i: usize) -> bool {
    if i + 1 < CONVERGENCE_LOOKBACK {
        return false;
    }
    let window = &indicators.convergence[i + 1 - CONVERGENCE_LOOKBACK..=i];
    let tight = window
        .iter()
        .filter(|c| c.is_some_and(|v| v < CONVERGENCE_THRESHOLD))
        .count();
    tight >= CONVERGENCE_MIN_DAYS
}

/// Close above every average and open below at least one of them.
fn crosses(close: f64, open: f64, averages: &[Option<f64>]) -> bool {
    let above_all = averages.iter().all(|m| m.is_some_and(|v| close > v));
    let opened_below = averages.iter().any(|m| m.is_some_and(|v| open < v));
    above_all && opened_below
}

fn ma_breakout(row: &DailySnapshotRow, ind: &RollingIndicatorSet, i: usize) -> bool {
    let (close, open) = (row.close, row.open);
    let up2 = crosses(close, open, &[ind.ma5[i], ind.ma10[i]]);
    let up3 = crosses(close, open, &[ind.ma5[i], ind.ma10[i], ind.ma20[i]]);
    let up4 = crosses(close, open, &[ind.ma5[i], ind.ma10[i], ind.ma20[i], ind.ma30[i]]);
    up2 || up3 || up4
}

fn golden_cross(ind: &RollingIndicatorSet, prev: usize, i: usize) -> bool {
    match (ind.ma60[prev], ind.ma120[prev], ind.ma60[i], ind.ma120[i]) {
        (Some(p60), Some(p120), Some(c60), Some(c120)) => p60 <= p120 && c60 > c120,
        _ => false,
    }
}

// ============================================================================
// Condition Pass Counts
// ============================================================================

/// How many evaluated symbols satisfied one condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionResult {
    pub condition: Condition,
    /// Number of symbols that satisfied this condition
    pub passed: usize,
    /// Number of symbols that did not
    pub eliminated: usize,
    /// Elimination rate (%)
    pub elimination_rate: f64,
}

impl ConditionResult {
    pub fn new(condition: Condition, input_count: usize, passed_count: usize) -> Self {
        let eliminated = input_count.saturating_sub(passed_count);
        let elimination_rate = if input_count > 0 {
            (eliminated as f64 / input_count as f64) * 100.0
        } else {
            0.0
        };

        Self {
            condition,
            passed: passed_count,
            eliminated,
            elimination_rate,
        }
    }
}
