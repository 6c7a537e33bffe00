//! Technical screener.
//!
//! Scans the latest stored cross-section for breakout candidates using each
//! symbol's own price history.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌────────────────┐
//! │ LocalStorage│────▶│  indicators  │────▶│     rules      │
//! │  (history)  │     │ MA5..MA120,  │     │ six conditions │
//! └─────────────┘     │ convergence  │     │ on latest row  │
//!                     └──────────────┘     └────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use stock_monitor::screener::ScreenerEngine;
//!
//! let engine = ScreenerEngine::new(storage, config.screener.clone());
//! let result = engine.run_screen().await?;
//! println!("{}", result.summary());
//! ```

pub mod engine;
pub mod indicators;
pub mod rules;

pub use engine::{screen, screen_history, ScreenOutcome, ScreenerEngine, ScreenerResult};
pub use indicators::{convergence, rolling_sma, RollingIndicatorSet, MA_WINDOWS};
pub use rules::{evaluate, Condition, ConditionResult, ConditionSet};
