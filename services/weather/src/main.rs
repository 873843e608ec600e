//! Weather Service - Enriches prepared locations with historical weather
//!
//! Responsibilities:
//! - Load the finalized locations table (surrogate ids + coordinates)
//! - Fetch hourly historical weather for all locations in one batched call
//! - Reconstruct observation timestamps from the reported series metadata
//! - Record missing or non-finite measurements as nulls, never as zeros
//! - Write the weather fact table keyed by location surrogate id
//!
//! The transport layer caches response bodies on disk indefinitely and
//! retries transient failures with backoff; the shaping code above it only
//! ever sees a body or a terminal error. A location with an unusable hourly
//! block is skipped with a warning - one bad location must not abort the
//! batch.
//!
//! Usage:
//!   cargo run --bin weather -- --start-date 2023-01-01 --end-date 2023-02-07
//!
//!   # Bypass the response cache:
//!   cargo run --bin weather -- --force

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "weather", about = "Fetches historical weather for the prepared locations")]
struct Args {
    /// First day of the range (inclusive), YYYY-MM-DD
    #[arg(long, default_value = "2023-01-01")]
    start_date: String,

    /// Last day of the range (inclusive), YYYY-MM-DD
    #[arg(long, default_value = "2023-02-07")]
    end_date: String,

    /// Force re-fetch even if a cached response exists
    #[arg(long, default_value = "false")]
    force: bool,

    /// Dry run - fetch and shape, don't write the output table
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

const LOCATIONS_FILENAME: &str = "locations.csv";
const WEATHER_FILENAME: &str = "weather.csv";

/// Hourly series requested from the archive endpoint.
const HOURLY_VARIABLES: &[&str] = &[
    "temperature_2m",
    "precipitation",
    "sunshine_duration",
    "weather_code",
];

/// High-resolution model the archive is queried against.
const WEATHER_MODEL: &str = "ecmwf_ifs";

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const FETCH_ATTEMPTS: u32 = 5;
const RETRY_BACKOFF_MS: u64 = 200;

#[derive(Debug, Clone)]
struct Config {
    result_dir: PathBuf,
    http_cache_dir: PathBuf,
    api_url: String,
}

impl Config {
    fn from_env() -> Self {
        Self {
            result_dir: PathBuf::from(
                std::env::var("RESULT_DIR").unwrap_or_else(|_| "./data/results".to_string()),
            ),
            http_cache_dir: PathBuf::from(
                std::env::var("HTTP_CACHE_DIR").unwrap_or_else(|_| "./data/cache/http".to_string()),
            ),
            api_url: std::env::var("WEATHER_API_URL")
                .unwrap_or_else(|_| "https://archive-api.open-meteo.com/v1/archive".to_string()),
        }
    }
}

// =============================================================================
// Location dimension input
// =============================================================================

/// Location row from the preparer's result table.
#[derive(Debug, Clone, Deserialize)]
struct Location {
    id: String,
    name: String,
    latitude: f64,
    longitude: f64,
}

fn parse_locations(content: &str) -> Result<Vec<Location>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for (line_idx, result) in reader.deserialize().enumerate() {
        let row: Location =
            result.with_context(|| format!("Invalid location row at line {}", line_idx + 2))?;
        // The id column must carry the surrogate keys minted by the preparer;
        // anything else means the wrong file was pointed at.
        Uuid::parse_str(&row.id)
            .with_context(|| format!("Invalid location id '{}' at line {}", row.id, line_idx + 2))?;
        rows.push(row);
    }
    Ok(rows)
}

// =============================================================================
// Provider response model
// =============================================================================

/// One per-location block of the archive response. The response carries one
/// block per requested coordinate pair, in request order.
#[derive(Debug, Deserialize)]
struct LocationBlock {
    #[serde(default)]
    hourly: Option<HourlyBlock>,
}

/// Hourly series metadata plus one value array per requested variable.
///
/// The provider reports the series endpoints (start, end, sampling interval);
/// observation timestamps are reconstructed locally from those rather than
/// trusting a provider time array.
#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time_start: i64,
    time_end: i64,
    interval_seconds: i64,
    #[serde(default)]
    temperature_2m: Option<Vec<Option<f64>>>,
    #[serde(default)]
    precipitation: Option<Vec<Option<f64>>>,
    #[serde(default)]
    sunshine_duration: Option<Vec<Option<f64>>>,
    #[serde(default)]
    weather_code: Option<Vec<Option<f64>>>,
}

/// One row of the weather fact table. Measurements are independently
/// nullable; nulls serialize as empty cells.
#[derive(Debug, PartialEq, Serialize)]
struct Observation {
    location_id: String,
    datetime: String,
    temperature_2m: Option<f64>,
    precipitation: Option<f64>,
    sunshine_duration: Option<f64>,
    weather_code: Option<i64>,
}

// =============================================================================
// Shaping
// =============================================================================

/// Reconstruct the timestamps of one hourly series from its endpoints: a
/// half-open sequence [start, end) stepped by the sampling interval.
fn expand_timestamps(time_start: i64, time_end: i64, interval_seconds: i64) -> Vec<i64> {
    if interval_seconds <= 0 || time_end <= time_start {
        return Vec::new();
    }
    (time_start..time_end)
        .step_by(interval_seconds as usize)
        .collect()
}

/// A measurement is recorded only when present and finite.
fn numeric_value(series: &[Option<f64>], idx: usize) -> Option<f64> {
    series.get(idx).copied().flatten().filter(|v| v.is_finite())
}

/// Shape one location's hourly block into observations.
///
/// Returns None when the block or any of the required variables is missing,
/// so the caller can skip the location without aborting the batch.
fn shape_location(location: &Location, block: &LocationBlock) -> Option<Vec<Observation>> {
    let hourly = block.hourly.as_ref()?;
    let temperature = hourly.temperature_2m.as_deref()?;
    let precipitation = hourly.precipitation.as_deref()?;
    let sunshine = hourly.sunshine_duration.as_deref()?;
    let weather_code = hourly.weather_code.as_deref()?;

    let timestamps = expand_timestamps(hourly.time_start, hourly.time_end, hourly.interval_seconds);

    let mut observations = Vec::with_capacity(timestamps.len());
    for (idx, &epoch) in timestamps.iter().enumerate() {
        let datetime = match DateTime::<Utc>::from_timestamp(epoch, 0) {
            Some(dt) => dt.format(DATETIME_FORMAT).to_string(),
            None => continue,
        };
        observations.push(Observation {
            location_id: location.id.clone(),
            datetime,
            temperature_2m: numeric_value(temperature, idx),
            precipitation: numeric_value(precipitation, idx),
            sunshine_duration: numeric_value(sunshine, idx),
            weather_code: numeric_value(weather_code, idx).map(|v| v.round() as i64),
        });
    }
    Some(observations)
}

/// Shape the full batch. Blocks pair with locations by request order; a
/// location with no usable block contributes zero rows.
fn shape_batch(locations: &[Location], blocks: &[LocationBlock]) -> Vec<Observation> {
    let mut observations = Vec::new();
    for (idx, location) in locations.iter().enumerate() {
        match blocks.get(idx).and_then(|block| shape_location(location, block)) {
            Some(mut rows) => {
                println!("  ✓ {}: {} observation(s)", location.name, rows.len());
                observations.append(&mut rows);
            }
            None => {
                eprintln!("  ⚠ No usable hourly data for {}, skipping", location.name);
            }
        }
    }
    observations
}

/// Build the batched archive request URL: comma-joined coordinate lists, the
/// inclusive date range, the hourly variable list and the model selector.
fn build_request_url(
    api_url: &str,
    locations: &[Location],
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> String {
    let latitudes = locations
        .iter()
        .map(|l| l.latitude.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let longitudes = locations
        .iter()
        .map(|l| l.longitude.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{}?latitude={}&longitude={}&start_date={}&end_date={}&hourly={}&timezone=UTC&models={}",
        api_url,
        latitudes,
        longitudes,
        start_date.format("%Y-%m-%d"),
        end_date.format("%Y-%m-%d"),
        HOURLY_VARIABLES.join(","),
        WEATHER_MODEL
    )
}

// =============================================================================
// Transport - cached, retrying HTTP client
// =============================================================================

/// HTTP transport with an indefinite on-disk response cache and backoff
/// retries. Cache entries are keyed by the sha256 of the full request URL,
/// so a changed date range or location set misses the cache.
struct CachedClient {
    client: reqwest::Client,
    cache_dir: PathBuf,
    force: bool,
}

impl CachedClient {
    fn new(cache_dir: PathBuf, force: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent("retail-mart-weather/0.1")
            .build()?;
        Ok(Self {
            client,
            cache_dir,
            force,
        })
    }

    fn cache_path(&self, url: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        self.cache_dir.join(format!("{:x}.json", hasher.finalize()))
    }

    async fn get(&self, url: &str) -> Result<String> {
        let cache_path = self.cache_path(url);
        if !self.force {
            if let Ok(cached) = fs::read_to_string(&cache_path).await {
                println!("  Cache hit: {}", cache_path.display());
                return Ok(cached);
            }
        }

        let mut last_error = None;
        for attempt in 1..=FETCH_ATTEMPTS {
            if attempt > 1 {
                let backoff = Duration::from_millis(RETRY_BACKOFF_MS * u64::from(attempt - 1));
                println!(
                    "  Retry {}/{} after {}ms...",
                    attempt,
                    FETCH_ATTEMPTS,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }
            match self.try_get(url).await {
                Ok(body) => {
                    fs::create_dir_all(&self.cache_dir)
                        .await
                        .with_context(|| format!("Failed to create {}", self.cache_dir.display()))?;
                    fs::write(&cache_path, &body)
                        .await
                        .with_context(|| format!("Failed to write {}", cache_path.display()))?;
                    return Ok(body);
                }
                Err(e) => {
                    eprintln!("  ✗ Attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("HTTP request failed")))
    }

    async fn try_get(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()
            .context("HTTP request failed")?;
        Ok(resp.text().await?)
    }
}

// =============================================================================
// Output
// =============================================================================

/// Write the weather table with an explicit header row. The header is written
/// even when there are no observations.
fn write_table(path: &Path, rows: &[Observation]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to open {} for writing", path.display()))?;
    writer
        .write_record([
            "location_id",
            "datetime",
            "temperature_2m",
            "precipitation",
            "sunshine_duration",
            "weather_code",
        ])
        .with_context(|| format!("Failed to write header to {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Failed to write row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Config::from_env();

    let start_date = NaiveDate::parse_from_str(&args.start_date, "%Y-%m-%d")
        .context("Invalid --start-date, expected YYYY-MM-DD")?;
    let end_date = NaiveDate::parse_from_str(&args.end_date, "%Y-%m-%d")
        .context("Invalid --end-date, expected YYYY-MM-DD")?;
    if end_date < start_date {
        anyhow::bail!("--end-date {} is before --start-date {}", end_date, start_date);
    }

    println!("=== Retail Mart Weather ===");
    println!("Range: {} to {}", start_date, end_date);
    println!("Model: {}", WEATHER_MODEL);
    println!("Variables: {}", HOURLY_VARIABLES.join(", "));
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let locations_path = config.result_dir.join(LOCATIONS_FILENAME);
    let content = fs::read_to_string(&locations_path).await.with_context(|| {
        format!(
            "Failed to read {} - run the preparer first",
            locations_path.display()
        )
    })?;
    let locations = parse_locations(&content)?;
    println!("Loaded {} location(s) from {}", locations.len(), locations_path.display());

    let output_path = config.result_dir.join(WEATHER_FILENAME);

    if locations.is_empty() {
        println!("No locations to fetch");
        if !args.dry_run {
            write_table(&output_path, &[])?;
            println!("Saved empty weather table to {}", output_path.display());
        }
        return Ok(());
    }

    let url = build_request_url(&config.api_url, &locations, start_date, end_date);
    println!("\nFetching hourly weather for {} location(s)...", locations.len());

    let client = CachedClient::new(config.http_cache_dir.clone(), args.force)?;
    let body = client.get(&url).await?;
    let blocks: Vec<LocationBlock> =
        serde_json::from_str(&body).context("Failed to decode archive response")?;

    if blocks.len() != locations.len() {
        eprintln!(
            "  ⚠ Response has {} block(s) for {} location(s)",
            blocks.len(),
            locations.len()
        );
    }

    let observations = shape_batch(&locations, &blocks);
    println!("\nShaped {} observation(s)", observations.len());

    if args.dry_run {
        println!("Dry run - no output written");
        return Ok(());
    }

    fs::create_dir_all(&config.result_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.result_dir.display()))?;
    write_table(&output_path, &observations)?;

    println!("\n=== Weather Complete ===");
    println!(
        "Saved {} observation(s) to {}",
        observations.len(),
        output_path.display()
    );

    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_location(id: &str, name: &str) -> Location {
        Location {
            id: id.to_string(),
            name: name.to_string(),
            latitude: 40.7,
            longitude: -74.0,
        }
    }

    /// Three hourly samples starting 2023-01-01 00:00:00 UTC.
    fn full_block() -> HourlyBlock {
        HourlyBlock {
            time_start: 1672531200,
            time_end: 1672531200 + 3 * 3600,
            interval_seconds: 3600,
            temperature_2m: Some(vec![Some(1.5), Some(2.0), None]),
            precipitation: Some(vec![Some(0.0), None, Some(0.4)]),
            sunshine_duration: Some(vec![Some(0.0), Some(1800.0), Some(3600.0)]),
            weather_code: Some(vec![Some(2.6), Some(0.0), Some(61.0)]),
        }
    }

    // -------------------------------------------------------------------------
    // TIMESTAMP RECONSTRUCTION TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_expand_timestamps_half_open() {
        let timestamps = expand_timestamps(0, 3 * 3600, 3600);
        assert_eq!(timestamps, vec![0, 3600, 7200]);
    }

    #[test]
    fn test_expand_timestamps_end_excluded() {
        let timestamps = expand_timestamps(1672531200, 1672531200 + 3600, 3600);
        assert_eq!(timestamps, vec![1672531200]);
    }

    #[test]
    fn test_expand_timestamps_degenerate_ranges() {
        assert!(expand_timestamps(100, 100, 3600).is_empty());
        assert!(expand_timestamps(200, 100, 3600).is_empty());
        assert!(expand_timestamps(0, 3600, 0).is_empty());
        assert!(expand_timestamps(0, 3600, -3600).is_empty());
    }

    // -------------------------------------------------------------------------
    // SHAPING TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_shape_location_full_block() {
        let location = test_location("loc-uuid", "New York");
        let block = LocationBlock {
            hourly: Some(full_block()),
        };

        let observations = shape_location(&location, &block).unwrap();

        assert_eq!(observations.len(), 3);
        assert_eq!(observations[0].location_id, "loc-uuid");
        assert_eq!(observations[0].datetime, "2023-01-01 00:00:00");
        assert_eq!(observations[1].datetime, "2023-01-01 01:00:00");
        assert_eq!(observations[0].temperature_2m, Some(1.5));
        assert_eq!(observations[0].weather_code, Some(3)); // 2.6 rounds up
        assert_eq!(observations[2].weather_code, Some(61));
    }

    #[test]
    fn test_shape_location_null_values_stay_null() {
        let location = test_location("loc-uuid", "New York");
        let block = LocationBlock {
            hourly: Some(full_block()),
        };

        let observations = shape_location(&location, &block).unwrap();

        assert_eq!(observations[2].temperature_2m, None);
        assert_eq!(observations[1].precipitation, None);
    }

    #[test]
    fn test_shape_location_non_finite_recorded_as_null() {
        let location = test_location("loc-uuid", "New York");
        let mut hourly = full_block();
        hourly.temperature_2m = Some(vec![Some(f64::NAN), Some(f64::INFINITY), Some(2.0)]);
        let block = LocationBlock {
            hourly: Some(hourly),
        };

        let observations = shape_location(&location, &block).unwrap();

        assert_eq!(observations[0].temperature_2m, None);
        assert_eq!(observations[1].temperature_2m, None);
        assert_eq!(observations[2].temperature_2m, Some(2.0));
    }

    #[test]
    fn test_shape_location_short_series_pads_with_null() {
        let location = test_location("loc-uuid", "New York");
        let mut hourly = full_block();
        hourly.precipitation = Some(vec![Some(0.1)]);
        let block = LocationBlock {
            hourly: Some(hourly),
        };

        let observations = shape_location(&location, &block).unwrap();

        assert_eq!(observations.len(), 3);
        assert_eq!(observations[0].precipitation, Some(0.1));
        assert_eq!(observations[1].precipitation, None);
        assert_eq!(observations[2].precipitation, None);
    }

    #[test]
    fn test_shape_location_missing_hourly_block_skips() {
        let location = test_location("loc-uuid", "New York");
        let block = LocationBlock { hourly: None };
        assert!(shape_location(&location, &block).is_none());
    }

    #[test]
    fn test_shape_location_missing_required_variable_skips() {
        let location = test_location("loc-uuid", "New York");
        let mut hourly = full_block();
        hourly.weather_code = None;
        let block = LocationBlock {
            hourly: Some(hourly),
        };
        assert!(shape_location(&location, &block).is_none());
    }

    #[test]
    fn test_shape_batch_isolates_bad_location() {
        // One location missing a required series contributes zero rows; the
        // other location in the same batch still contributes all of its rows.
        let good = test_location("good-uuid", "New York");
        let bad = test_location("bad-uuid", "Los Angeles");
        let mut broken = full_block();
        broken.weather_code = None;
        let blocks = vec![
            LocationBlock {
                hourly: Some(full_block()),
            },
            LocationBlock {
                hourly: Some(broken),
            },
        ];

        let observations = shape_batch(&[good, bad], &blocks);

        assert_eq!(observations.len(), 3);
        assert!(observations.iter().all(|o| o.location_id == "good-uuid"));
    }

    #[test]
    fn test_shape_batch_missing_trailing_block() {
        let first = test_location("first-uuid", "New York");
        let second = test_location("second-uuid", "Los Angeles");
        let blocks = vec![LocationBlock {
            hourly: Some(full_block()),
        }];

        let observations = shape_batch(&[first, second], &blocks);

        assert_eq!(observations.len(), 3);
        assert!(observations.iter().all(|o| o.location_id == "first-uuid"));
    }

    #[test]
    fn test_decode_archive_response_json() {
        let body = r#"[
            {
                "latitude": 40.7,
                "longitude": -74.0,
                "hourly": {
                    "time_start": 1672531200,
                    "time_end": 1672538400,
                    "interval_seconds": 3600,
                    "temperature_2m": [1.5, null],
                    "precipitation": [0.0, 0.4],
                    "sunshine_duration": [0.0, 1800.0],
                    "weather_code": [2.0, 61.0]
                }
            },
            { "latitude": 34.1, "longitude": -118.2 }
        ]"#;

        let blocks: Vec<LocationBlock> = serde_json::from_str(body).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1].hourly.is_none());

        let location = test_location("loc-uuid", "New York");
        let observations = shape_location(&location, &blocks[0]).unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[1].temperature_2m, None);
        assert_eq!(observations[1].precipitation, Some(0.4));
    }

    // -------------------------------------------------------------------------
    // REQUEST BUILDING TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_build_request_url_batches_coordinates() {
        let locations = vec![
            Location {
                id: "a".to_string(),
                name: "New York".to_string(),
                latitude: 40.7,
                longitude: -74.0,
            },
            Location {
                id: "b".to_string(),
                name: "Los Angeles".to_string(),
                latitude: 34.1,
                longitude: -118.2,
            },
        ];
        let url = build_request_url(
            "https://example.test/v1/archive",
            &locations,
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 2, 7).unwrap(),
        );

        assert!(url.starts_with("https://example.test/v1/archive?"));
        assert!(url.contains("latitude=40.7,34.1"));
        assert!(url.contains("longitude=-74,-118.2"));
        assert!(url.contains("start_date=2023-01-01"));
        assert!(url.contains("end_date=2023-02-07"));
        assert!(url.contains(
            "hourly=temperature_2m,precipitation,sunshine_duration,weather_code"
        ));
        assert!(url.contains("models=ecmwf_ifs"));
    }

    // -------------------------------------------------------------------------
    // LOCATIONS INPUT TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_locations_from_result_table() {
        let csv = "id,name,latitude,longitude\n\
                   0b06b2e1-66a7-4b0c-8b4c-8c5a7f6d9e10,New York,40.7,-74.0\n";
        let locations = parse_locations(csv).unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].name, "New York");
        assert_eq!(locations[0].latitude, 40.7);
    }

    #[test]
    fn test_parse_locations_rejects_non_uuid_id() {
        let csv = "id,name,latitude,longitude\nNYC,New York,40.7,-74.0\n";
        let result = parse_locations(csv);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid location id"));
    }

    // -------------------------------------------------------------------------
    // OUTPUT WRITING TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_write_table_nulls_as_empty_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather.csv");
        let rows = vec![Observation {
            location_id: "loc-uuid".to_string(),
            datetime: "2023-01-01 00:00:00".to_string(),
            temperature_2m: Some(1.5),
            precipitation: None,
            sunshine_duration: Some(0.0),
            weather_code: None,
        }];

        write_table(&path, &rows).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "location_id,datetime,temperature_2m,precipitation,sunshine_duration,weather_code\n\
             loc-uuid,2023-01-01 00:00:00,1.5,,0.0,\n"
        );
    }

    #[test]
    fn test_write_table_header_only_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather.csv");

        write_table(&path, &[]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "location_id,datetime,temperature_2m,precipitation,sunshine_duration,weather_code\n"
        );
    }

    // -------------------------------------------------------------------------
    // TRANSPORT TESTS
    // -------------------------------------------------------------------------

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_cached_client_serves_second_request_from_disk() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/archive"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = CachedClient::new(dir.path().to_path_buf(), false).unwrap();
        let url = format!("{}/v1/archive?latitude=40.7", server.uri());

        let first = client.get(&url).await.unwrap();
        let second = client.get(&url).await.unwrap();

        assert_eq!(first, "[]");
        assert_eq!(second, "[]");
    }

    #[tokio::test]
    async fn test_cached_client_force_bypasses_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/archive"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = CachedClient::new(dir.path().to_path_buf(), true).unwrap();
        let url = format!("{}/v1/archive?latitude=40.7", server.uri());

        client.get(&url).await.unwrap();
        client.get(&url).await.unwrap();
    }

    #[tokio::test]
    async fn test_cached_client_gives_up_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/archive"))
            .respond_with(ResponseTemplate::new(500))
            .expect(u64::from(FETCH_ATTEMPTS))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = CachedClient::new(dir.path().to_path_buf(), false).unwrap();
        let url = format!("{}/v1/archive?latitude=40.7", server.uri());

        let result = client.get(&url).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cached_client_distinct_urls_distinct_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/archive"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = CachedClient::new(dir.path().to_path_buf(), false).unwrap();

        client
            .get(&format!("{}/v1/archive?latitude=40.7", server.uri()))
            .await
            .unwrap();
        client
            .get(&format!("{}/v1/archive?latitude=34.1", server.uri()))
            .await
            .unwrap();
    }
}
