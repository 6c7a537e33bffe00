//! Trading calendar: target-date resolution and reconciliation against the
//! provider.

pub mod reconciler;
pub mod resolver;

pub use reconciler::{CalendarDelta, CalendarReconciler, ReconcileOutcome};
pub use resolver::{resolve_target_date, MarketClock, MARKET_CLOSE_HOUR, MAX_LOOKBACK_DAYS};
