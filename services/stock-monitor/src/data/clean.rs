//! Raw cross-section cleaning.
//!
//! Turns provider records keyed by localized column names into canonical
//! [`DailySnapshotRow`]s. Pure: no I/O, no clock.

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::HashSet;

use super::{DailySnapshotRow, RawRecord};

/// Name given to rows whose name is missing or blank.
pub const UNKNOWN_NAME: &str = "未知";

/// Localized provider column name → canonical field name.
pub const LOCALIZED_FIELDS: &[(&str, &str)] = &[
    ("代码", "symbol"),
    ("名称", "name"),
    ("最新价", "close"),
    ("涨跌幅", "change_percent"),
    ("涨跌额", "change_amount"),
    ("成交量", "volume"),
    ("成交额", "turnover_value"),
    ("振幅", "amplitude"),
    ("最高", "high"),
    ("最低", "low"),
    ("今开", "open"),
    ("昨收", "yesterday_close"),
    ("换手率", "turnover_ratio"),
    ("市盈率-动态", "pe_ttm"),
    ("市净率", "pb"),
    ("总市值", "market_value"),
    ("流通市值", "circulation_market_value"),
    ("涨速", "rise_speed"),
    ("5分钟涨跌", "five_minute_change"),
    ("60日涨跌幅", "sixty_day_change_percent"),
    ("年初至今涨跌幅", "year_to_date_change_percent"),
];

/// Canonical name for a provider column, accepting both localized and
/// canonical spellings. Unknown columns map to `None`.
pub fn canonical_field(column: &str) -> Option<&'static str> {
    LOCALIZED_FIELDS
        .iter()
        .find(|(localized, canonical)| *localized == column || *canonical == column)
        .map(|(_, canonical)| *canonical)
}

/// Clean a raw cross-section into rows stamped with `trade_date`.
///
/// Rows without a symbol or with a negative price are dropped; the first
/// occurrence of a symbol wins.
pub fn clean_snapshot(raw: &[RawRecord], trade_date: NaiveDate) -> Vec<DailySnapshotRow> {
    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(raw.len());

    for record in raw {
        let Some(row) = clean_record(record, trade_date) else {
            continue;
        };
        if row.has_negative_price() {
            continue;
        }
        if seen.insert(row.symbol.clone()) {
            rows.push(row);
        }
    }

    rows
}

fn clean_record(record: &RawRecord, trade_date: NaiveDate) -> Option<DailySnapshotRow> {
    let mut symbol = None;
    let mut name = None;
    let mut row = DailySnapshotRow::empty(String::new(), UNKNOWN_NAME, trade_date);

    for (column, value) in record {
        let Some(field) = canonical_field(column) else {
            continue;
        };

        match field {
            "symbol" => symbol = text_value(value),
            "name" => name = text_value(value),
            numeric => {
                if let Some(slot) = numeric_slot(&mut row, numeric) {
                    *slot = coerce_number(value);
                }
            }
        }
    }

    row.symbol = symbol?;
    if let Some(name) = name {
        row.name = name;
    }
    Some(row)
}

fn numeric_slot<'a>(row: &'a mut DailySnapshotRow, field: &str) -> Option<&'a mut f64> {
    let slot = match field {
        "close" => &mut row.close,
        "change_percent" => &mut row.change_percent,
        "change_amount" => &mut row.change_amount,
        "volume" => &mut row.volume,
        "turnover_value" => &mut row.turnover_value,
        "amplitude" => &mut row.amplitude,
        "high" => &mut row.high,
        "low" => &mut row.low,
        "open" => &mut row.open,
        "yesterday_close" => &mut row.yesterday_close,
        "turnover_ratio" => &mut row.turnover_ratio,
        "pe_ttm" => &mut row.pe_ttm,
        "pb" => &mut row.pb,
        "market_value" => &mut row.market_value,
        "circulation_market_value" => &mut row.circulation_market_value,
        "rise_speed" => &mut row.rise_speed,
        "five_minute_change" => &mut row.five_minute_change,
        "sixty_day_change_percent" => &mut row.sixty_day_change_percent,
        "year_to_date_change_percent" => &mut row.year_to_date_change_percent,
        _ => return None,
    };
    Some(slot)
}

/// Trimmed, non-blank text from a string or number.
fn text_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Numbers and numeric strings become `f64`; everything else (including
/// `"-"` placeholders and non-finite values) becomes `0.0`.
fn coerce_number(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

// ============================================================================
// Tests
// ============================================================================
