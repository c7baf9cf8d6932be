//! Flattens nested API records into CSV-ready rows.
//!
//! Missing nested objects and fields become `null` (an empty CSV cell)
//! rather than errors; upstream records are frequently sparse.

use backyard_ecology_fetch_models::FlatRecord;
use chrono::NaiveDate;
use serde_json::Value;

/// Columns of a flattened detection, in output order.
pub const DETECTION_FIELDS: &[&str] = &[
    "id",
    "timestamp",
    "certainty",
    "confidence",
    "probability",
    "score",
    "lat",
    "lon",
    "species_common",
    "species_scientific",
    "species_ebird",
    "station_id",
    "station_name",
    "sound_url",
    "sound_start",
    "sound_end",
];

/// Columns of a flattened station.
pub const STATION_FIELDS: &[&str] = &[
    "id",
    "name",
    "type",
    "timezone",
    "lat",
    "lon",
    "earliest_detection_at",
    "latest_detection_at",
];

/// Columns of a flattened daily-count row.
pub const DAILY_COUNT_FIELDS: &[&str] = &[
    "date",
    "day_of_year",
    "total",
    "species_id",
    "species_common",
    "species_scientific",
    "count",
];

/// Columns of a flattened Haikubox daily-count row.
pub const HAIKUBOX_FIELDS: &[&str] = &[
    "date",
    "serial_code",
    "species_name",
    "species_scientific",
    "count",
    "total_daily_detections",
];

/// Reads `path` (a chain of object keys) from `value`, or `null`.
fn pick(value: &Value, path: &[&str]) -> Value {
    path.iter()
        .try_fold(value, |v, key| v.get(key))
        .cloned()
        .unwrap_or(Value::Null)
}

fn row<const N: usize>(fields: [(&str, Value); N]) -> FlatRecord {
    fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Flattens a `BirdWeather` detection node.
#[must_use]
pub fn detection(node: &Value) -> FlatRecord {
    row([
        ("id", pick(node, &["id"])),
        ("timestamp", pick(node, &["timestamp"])),
        ("certainty", pick(node, &["certainty"])),
        ("confidence", pick(node, &["confidence"])),
        ("probability", pick(node, &["probability"])),
        ("score", pick(node, &["score"])),
        ("lat", pick(node, &["coords", "lat"])),
        ("lon", pick(node, &["coords", "lon"])),
        ("species_common", pick(node, &["species", "commonName"])),
        ("species_scientific", pick(node, &["species", "scientificName"])),
        ("species_ebird", pick(node, &["species", "ebirdCode"])),
        ("station_id", pick(node, &["station", "id"])),
        ("station_name", pick(node, &["station", "name"])),
        ("sound_url", pick(node, &["soundscape", "url"])),
        ("sound_start", pick(node, &["soundscape", "startTime"])),
        ("sound_end", pick(node, &["soundscape", "endTime"])),
    ])
}

/// Flattens a `BirdWeather` station node.
#[must_use]
pub fn station(node: &Value) -> FlatRecord {
    row([
        ("id", pick(node, &["id"])),
        ("name", pick(node, &["name"])),
        ("type", pick(node, &["type"])),
        ("timezone", pick(node, &["timezone"])),
        ("lat", pick(node, &["coords", "lat"])),
        ("lon", pick(node, &["coords", "lon"])),
        ("earliest_detection_at", pick(node, &["earliestDetectionAt"])),
        ("latest_detection_at", pick(node, &["latestDetectionAt"])),
    ])
}

/// Flattens one `dailyDetectionCounts` entry into one row per species.
///
/// A day with no species counts still yields a single row carrying the
/// day's total, so quiet days are visible in the output.
#[must_use]
pub fn daily_count(day: &Value) -> Vec<FlatRecord> {
    let date = pick(day, &["date"]);
    let day_of_year = pick(day, &["dayOfYear"]);
    let total = pick(day, &["total"]);

    let counts = day
        .get("counts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    if counts.is_empty() {
        return vec![row([
            ("date", date),
            ("day_of_year", day_of_year),
            ("total", total),
            ("species_id", Value::Null),
            ("species_common", Value::Null),
            ("species_scientific", Value::Null),
            ("count", Value::Null),
        ])];
    }

    counts
        .iter()
        .map(|c| {
            row([
                ("date", date.clone()),
                ("day_of_year", day_of_year.clone()),
                ("total", total.clone()),
                ("species_id", pick(c, &["speciesId"])),
                ("species_common", pick(c, &["species", "commonName"])),
                ("species_scientific", pick(c, &["species", "scientificName"])),
                ("count", pick(c, &["count"])),
            ])
        })
        .collect()
}

/// Flattens a Haikubox `daily-count` response into one row per species.
///
/// Species without a name are reported as `Unknown`; a missing count is
/// zero. Every row carries the sum of all species counts for the day.
#[must_use]
pub fn haikubox_daily(serial: &str, date: NaiveDate, body: &Value) -> Vec<FlatRecord> {
    let species = body
        .get("species")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let total: u64 = species
        .iter()
        .filter_map(|s| s.get("count").and_then(Value::as_u64))
        .sum();

    species
        .iter()
        .map(|s| {
            row([
                ("date", Value::from(date.to_string())),
                ("serial_code", Value::from(serial)),
                (
                    "species_name",
                    Value::from(s.get("name").and_then(Value::as_str).unwrap_or("Unknown")),
                ),
                (
                    "species_scientific",
                    Value::from(
                        s.get("scientific_name")
                            .and_then(Value::as_str)
                            .unwrap_or_default(),
                    ),
                ),
                (
                    "count",
                    Value::from(s.get("count").and_then(Value::as_u64).unwrap_or(0)),
                ),
                ("total_daily_detections", Value::from(total)),
            ])
        })
        .collect()
}
