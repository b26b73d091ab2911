use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Prices above this are treated as feed corruption and dropped.
const MAX_SANE_PRICE: i64 = 1 << 48;

/// Drop negative or absurdly large values rather than poisoning downstream
/// math with them.
pub fn sane_price(value: Option<i64>) -> Option<i64> {
    value.filter(|v| *v > 0 && *v <= MAX_SANE_PRICE)
}

pub fn sane_volume(value: i64) -> i64 {
    if (0..=MAX_SANE_PRICE).contains(&value) {
        value
    } else {
        0
    }
}

/// Raw `/latest` body: `{"data": {"<id>": {"high":..,"highTime":..,"low":..,"lowTime":..}}}`.
#[derive(Debug, Deserialize)]
pub struct LatestResponse {
    pub data: HashMap<String, LatestEntry>,
}

#[derive(Debug, Deserialize)]
pub struct LatestEntry {
    pub high: Option<i64>,
    #[serde(rename = "highTime")]
    pub high_time: Option<i64>,
    pub low: Option<i64>,
    #[serde(rename = "lowTime")]
    pub low_time: Option<i64>,
}

/// Normalized instant-price quote for one item.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatestQuote {
    pub low: Option<i64>,
    pub low_time: Option<i64>,
    pub high: Option<i64>,
    pub high_time: Option<i64>,
}

impl LatestQuote {
    pub fn from_entry(entry: &LatestEntry) -> Self {
        Self {
            low: sane_price(entry.low),
            low_time: entry.low_time,
            high: sane_price(entry.high),
            high_time: entry.high_time,
        }
    }
}

/// Raw `/5m` and `/1h` bodies share one shape.
#[derive(Debug, Deserialize)]
pub struct WindowResponse {
    pub data: HashMap<String, WindowEntry>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct WindowEntry {
    #[serde(rename = "avgHighPrice")]
    pub avg_high_price: Option<i64>,
    #[serde(rename = "highPriceVolume", default)]
    pub high_price_volume: i64,
    #[serde(rename = "avgLowPrice")]
    pub avg_low_price: Option<i64>,
    #[serde(rename = "lowPriceVolume", default)]
    pub low_price_volume: i64,
}

/// Normalized averaged-window stats. `volume` is the combined trade count
/// for the window (both sides of the book).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WindowStats {
    pub avg_high: Option<i64>,
    pub avg_low: Option<i64>,
    pub volume: i64,
}

impl WindowStats {
    pub fn from_entry(entry: &WindowEntry) -> Self {
        Self {
            avg_high: sane_price(entry.avg_high_price),
            avg_low: sane_price(entry.avg_low_price),
            volume: sane_volume(entry.high_price_volume) + sane_volume(entry.low_price_volume),
        }
    }
}

/// One `/mapping` row.
#[derive(Debug, Deserialize)]
pub struct MappingEntry {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub members: bool,
    pub limit: Option<i64>,
    pub examine: Option<String>,
    pub icon: Option<String>,
    pub highalch: Option<i64>,
    pub lowalch: Option<i64>,
}

/// Cached item metadata. `buy_limit == 0` marks untradeable items, which the
/// event engine excludes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemMeta {
    pub id: i64,
    pub name: String,
    pub members: bool,
    pub buy_limit: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highalch: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lowalch: Option<i64>,
}

impl ItemMeta {
    pub fn from_mapping(entry: MappingEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name,
            members: entry.members,
            buy_limit: entry.limit.unwrap_or(0).max(0),
            examine: entry.examine,
            icon: entry.icon,
            highalch: entry.highalch,
            lowalch: entry.lowalch,
        }
    }
}
