//! Deterministic items and log events.

use logs::LogEvent;
use tables::{Item, ItemValue};

/// A record of declared scalar types. Some records lack optional attributes
/// so tables carry a ragged schema.
pub fn record(model: &str, i: usize) -> Item {
    let mut item = Item::new();
    item.insert("id".into(), ItemValue::string(format!("{model}#{i:05}")));
    item.insert("name".into(), ItemValue::string(format!("{model} {i}, main event")));
    item.insert("buyIn".into(), ItemValue::number(100 + i * 5));
    item.insert("isSeries".into(), ItemValue::Bool(i % 2 == 0));
    if i % 3 == 0 {
        item.insert("venueId".into(), ItemValue::string(format!("venue-{}", i % 7)));
    }
    if i % 4 == 0 {
        item.insert("notes".into(), ItemValue::Null);
    }
    if i % 5 == 0 {
        item.insert("guarantee".into(), ItemValue::number(format!("{i}.5")));
    }
    item
}

/// `count` events one second apart starting at `base`.
pub fn events(base: i64, count: usize) -> Vec<LogEvent> {
    (0..count)
        .map(|i| LogEvent::new(base + (i as i64) * 1_000, format!("REPORT RequestId: {i} Duration: {i}.0 ms")))
        .collect()
}
