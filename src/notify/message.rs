//! Renders the aggregate into the chat message.
//!
//! Output depends only on the aggregate: keys are visited in a fixed order and
//! no clock or environment is consulted, so the same record always produces
//! the same text.

use std::borrow::Cow;

use itertools::Itertools;
use serde_json::{Map, Value};

use crate::aggregate::{
    MetricsAggregate, MissingGroup, CHURN, COUPONS, DAILY, PENDO_FEATURES, PENDO_PAGES,
    SIGNUP_BY_COUPON,
};

const REPORT_DATE: &str = "report_date";
const NO_COUPON_CODE: &str = "no coupon code";

/// Fixed labels, in the order they are listed within a section. Fields not
/// listed here follow in key order with a label derived from the key.
const FIELD_LABELS: &[(&str, &str)] = &[
    ("total", "Lifetime user total"),
    ("trials", "Total trials"),
    ("active_subscriptions", "Active subscriptions"),
    ("past_due_subscriptions", "Past due subscriptions"),
    ("yearly_subscriptions", "Yearly subscriptions"),
    ("cancelled_subscriptions", "Cancelled subscriptions"),
    ("cancel_after_trial", "Cancelled after trial"),
    ("cancel_during_trial", "Cancelled during trial"),
    ("ios_first_time_downloads", "iOS first-time downloads"),
    ("ios_total_downloads", "iOS total downloads"),
    ("google_play_active_installs", "Google Play active installs"),
    ("coupon_active_subscriptions", "Active subscriptions"),
    ("total_trials", "Total trials"),
    ("total_conversions", "Total conversions"),
    ("conversion_rate", "Conversion rate (%)"),
    ("new_signups_without_coupon", "New signups without a coupon"),
    ("new_signups_with_coupon", "New signups with a coupon"),
    ("total_new_signups", "Total new signups"),
];

const PERIOD_LABELS: &[(&str, &str)] = &[
    ("all", "All time"),
    ("last_week", "Last week"),
    ("last_month", "Last month"),
];

/// Renders the full message. Every warehouse and engagement group must be present.
pub fn render(aggregate: &MetricsAggregate) -> Result<String, MissingGroup> {
    let daily = aggregate.require(DAILY)?;
    let churn = aggregate.require(CHURN)?;
    let coupons = aggregate.require(COUPONS)?;
    let signups = aggregate.require(SIGNUP_BY_COUPON)?;
    let features = aggregate.require(PENDO_FEATURES)?;
    let pages = aggregate.require(PENDO_PAGES)?;

    let mut lines = Vec::new();
    match daily.get(REPORT_DATE).and_then(Value::as_str) {
        Some(date) => lines.push(format!("Stats for {}", date)),
        None => lines.push("Stats".to_string()),
    }

    section(&mut lines, "Daily summary");
    render_fields(&mut lines, daily, 0, &[REPORT_DATE]);

    section(&mut lines, "Churn summary");
    render_fields(&mut lines, churn, 0, &[]);

    section(&mut lines, "Coupon summary");
    render_coupon_snapshot(&mut lines, coupons);
    render_keyed(&mut lines, coupons, |key| Cow::Borrowed(key));

    section(&mut lines, "Signups by coupon");
    render_keyed(&mut lines, signups, |key| {
        Cow::Borrowed(lookup(PERIOD_LABELS, key).unwrap_or(key))
    });

    section(&mut lines, "Engagement summary");
    render_engagement(&mut lines, features, pages);

    Ok(lines.join("\n"))
}

fn section(lines: &mut Vec<String>, title: &str) {
    lines.push(String::new());
    lines.push(format!("*{}*", title));
}

fn bullet(depth: usize) -> String {
    match depth {
        0 => "•  ".to_string(),
        1 => "   ○  ".to_string(),
        n => format!("{}▪  ", "   ".repeat(n)),
    }
}

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, label)| *label)
}

fn field_label(key: &str) -> Cow<'_, str> {
    if let Some(label) = lookup(FIELD_LABELS, key) {
        return Cow::Borrowed(label);
    }
    // churn_<status>_<all|week|month>
    if let Some(rest) = key.strip_prefix("churn_") {
        for (suffix, period) in [("_all", "all time"), ("_week", "last week"), ("_month", "last month")] {
            if let Some(status) = rest.strip_suffix(suffix) {
                return Cow::Owned(format!("{} ({})", humanize(status), period));
            }
        }
    }
    Cow::Owned(humanize(key))
}

fn humanize(key: &str) -> String {
    let spaced = key.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => spaced,
    }
}

/// Known fields first in table order, then the rest by key.
fn ordered_fields<'m>(map: &'m Map<String, Value>) -> impl Iterator<Item = (&'m String, &'m Value)> {
    map.iter().sorted_by_key(|(key, _)| {
        let rank = FIELD_LABELS
            .iter()
            .position(|(k, _)| k == key)
            .unwrap_or(FIELD_LABELS.len());
        (rank, key.as_str())
    })
}

fn render_fields(lines: &mut Vec<String>, value: &Value, depth: usize, skip: &[&str]) {
    match value {
        Value::Object(map) => {
            for (key, value) in ordered_fields(map).filter(|(k, _)| !skip.contains(&k.as_str())) {
                render_named(lines, depth, &field_label(key), value);
            }
        }
        other => lines.push(format!("{}{}", bullet(depth), scalar(other))),
    }
}

fn render_named(lines: &mut Vec<String>, depth: usize, name: &str, value: &Value) {
    match value {
        Value::Object(_) => {
            lines.push(format!("{}{}", bullet(depth), name));
            render_fields(lines, value, depth + 1, &[]);
        }
        other => lines.push(format!("{}{}: {}", bullet(depth), name, scalar(other))),
    }
}

/// Top level keys are data (coupon codes, periods) and are shown as given.
fn render_keyed<'v, F>(lines: &mut Vec<String>, value: &'v Value, name_of: F)
where
    F: Fn(&'v str) -> Cow<'v, str>,
{
    match value {
        Value::Object(map) => {
            for (key, value) in map.iter().sorted_by_key(|(key, _)| key.as_str()) {
                render_named(lines, 0, &name_of(key), value);
            }
        }
        other => lines.push(format!("{}{}", bullet(0), scalar(other))),
    }
}

fn render_coupon_snapshot(lines: &mut Vec<String>, coupons: &Value) {
    let Some(map) = coupons.as_object() else {
        return;
    };
    let entries: Vec<(&String, &Map<String, Value>)> = map
        .iter()
        .filter_map(|(code, stats)| stats.as_object().map(|stats| (code, stats)))
        .collect();
    if entries.is_empty() {
        return;
    }

    let count = |stats: &Map<String, Value>, field: &str| -> i64 {
        stats
            .get(field)
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64)))
            .unwrap_or(0)
    };
    let is_no_coupon = |code: &str| code.to_lowercase() == NO_COUPON_CODE;

    let total_active: i64 = entries
        .iter()
        .map(|(_, stats)| count(stats, "coupon_active_subscriptions"))
        .sum();
    let trials_without: i64 = entries
        .iter()
        .filter(|(code, _)| is_no_coupon(code))
        .map(|(_, stats)| count(stats, "total_trials"))
        .sum();
    let trials_with: i64 = entries
        .iter()
        .filter(|(code, _)| !is_no_coupon(code))
        .map(|(_, stats)| count(stats, "total_trials"))
        .sum();

    lines.push(format!("{}Active snapshot stats :", bullet(0)));
    lines.push(format!("{}Total Active Users: {}", bullet(1), total_active));
    lines.push(format!(
        "{}Total Active Trial Users without a coupon: {}",
        bullet(1),
        trials_without
    ));
    lines.push(format!(
        "{}Total Active Trial Users with a coupon: {}",
        bullet(1),
        trials_with
    ));
}

fn render_engagement(lines: &mut Vec<String>, features: &Value, pages: &Value) {
    let empty = Map::new();
    let features = features.as_object().unwrap_or(&empty);
    let pages = pages.as_object().unwrap_or(&empty);

    let segments = features.keys().chain(pages.keys()).sorted().dedup();
    for segment in segments {
        lines.push(format!("{}{}", bullet(0), segment));
        for (title, group) in [("Feature clicks", features), ("Page views", pages)] {
            let Some(counts) = group.get(segment) else {
                continue;
            };
            match counts {
                Value::Object(counts) => {
                    lines.push(format!("{}{}", bullet(1), title));
                    for (name, count) in counts.iter().sorted_by_key(|(name, _)| name.as_str()) {
                        lines.push(format!("{}{}: {}", bullet(2), name, scalar(count)));
                    }
                }
                other => lines.push(format!("{}{}: {}", bullet(1), title, scalar(other))),
            }
        }
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::Null => "n/a".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => format!("{:.0}", f),
            Some(f) => format!("{:.2}", f),
            None => n.to_string(),
        },
        Value::Array(items) => items.iter().map(scalar).join(", "),
        other => other.to_string(),
    }
}
