//! Preparer Service - Normalizes raw retail extracts into surrogate-keyed tables
//!
//! Responsibilities:
//! - Mint UUID surrogate keys for the location and product dimensions
//! - Persist natural-key -> surrogate-key maps for downstream stages
//! - Reshape wide product attribute columns into a long attributes table
//! - Resolve sales and stock facts against the persisted key maps
//! - Write result tables as headered CSV with no index column
//!
//! Stages run sequentially: locations -> products -> sales -> stocks.
//! The fact stages consume the key maps written by the dimension stages,
//! so a partial run must execute the dimension stages first.
//!
//! Surrogate keys are minted fresh on every run: re-running the pipeline
//! produces different ids for the same entities by design.
//!
//! Usage:
//!   # Full run:
//!   cargo run --bin preparer
//!
//!   # Single stage:
//!   cargo run --bin preparer -- --stage locations
//!
//!   # Drop (and count) fact rows that reference unknown keys instead of failing:
//!   cargo run --bin preparer -- --on-missing-key skip

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "preparer", about = "Normalizes raw retail extracts into surrogate-keyed tables")]
struct Args {
    /// Stage to run: locations, products, sales, stocks or all
    #[arg(long, default_value = "all")]
    stage: String,

    /// Policy for fact rows whose natural key has no map entry: fail or skip
    #[arg(long, default_value = "fail")]
    on_missing_key: String,

    /// Dry run - parse and report, don't write any output
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

const STAGES: &[&str] = &["all", "locations", "products", "sales", "stocks"];

// Filenames are shared between the raw extracts and the result tables: the
// pipeline reads `locations.csv` from the data folder and writes the
// transformed `locations.csv` into the result folder.
const LOCATIONS_FILENAME: &str = "locations.csv";
const PRODUCTS_FILENAME: &str = "products.csv";
const PRODUCT_ATTRIBUTES_FILENAME: &str = "product_attributes.csv";
const SALES_FILENAME: &str = "sales.csv";
const STOCKS_FILENAME: &str = "stocks.csv";
const LOCATION_KEYMAP_FILENAME: &str = "location_uuid_map.json";
const PRODUCT_KEYMAP_FILENAME: &str = "product_uuid_map.json";

/// Sentinel the raw perishability field must equal (after normalization).
const PERISHABLE_SENTINEL: &str = "PERISHABLE";

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
struct Config {
    data_dir: PathBuf,
    result_dir: PathBuf,
    cache_dir: PathBuf,
}

impl Config {
    fn from_env() -> Self {
        Self {
            data_dir: PathBuf::from(
                std::env::var("DATA_DIR").unwrap_or_else(|_| "./data/raw".to_string()),
            ),
            result_dir: PathBuf::from(
                std::env::var("RESULT_DIR").unwrap_or_else(|_| "./data/results".to_string()),
            ),
            cache_dir: PathBuf::from(
                std::env::var("CACHE_DIR").unwrap_or_else(|_| "./data/cache".to_string()),
            ),
        }
    }

    fn location_keymap_path(&self) -> PathBuf {
        self.cache_dir.join(LOCATION_KEYMAP_FILENAME)
    }

    fn product_keymap_path(&self) -> PathBuf {
        self.cache_dir.join(PRODUCT_KEYMAP_FILENAME)
    }
}

// =============================================================================
// KEY MAPPER
// =============================================================================

/// Natural-key -> surrogate-key map for one dimension, persisted to the cache
/// folder as a flat JSON object. Written once per run by the dimension stage
/// that owns it, read-only for every later stage.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct KeyMap(BTreeMap<String, String>);

impl KeyMap {
    fn resolve(&self, natural_key: &str) -> Option<&str> {
        self.0.get(natural_key).map(|s| s.as_str())
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    /// Overwrites any previously persisted map at `path` (no merge).
    async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write key map to {}", path.display()))?;
        Ok(())
    }

    async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read key map from {} - run the dimension stages first", path.display()))?;
        let map = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse key map at {}", path.display()))?;
        Ok(map)
    }
}

/// Mint one fresh random surrogate key per natural key.
///
/// The caller passes an already de-duplicated sequence; a duplicate natural
/// key silently overwrites the earlier entry (last write wins), which is the
/// caller's problem, not this function's.
fn mint_keys(natural_keys: &[String]) -> KeyMap {
    let mut map = BTreeMap::new();
    for key in natural_keys {
        map.insert(key.clone(), Uuid::new_v4().to_string());
    }
    KeyMap(map)
}

// =============================================================================
// CSV HELPERS
// =============================================================================

fn csv_reader(content: &str) -> csv::Reader<&[u8]> {
    // Strip the UTF-8 BOM some exports carry before handing off to csv
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes())
}

/// Find the index of a required column, failing with file and column name.
fn require_column(headers: &csv::StringRecord, name: &str, file: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .with_context(|| format!("SCHEMA: required column '{}' missing from {}", name, file))
}

/// Write a result table with an explicit header row. The header is written
/// even when the table has no rows.
fn write_table<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to open {} for writing", path.display()))?;
    writer
        .write_record(header)
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

/// Parse a source timestamp, accepting both `2023-01-05 13:45:00` and the ISO
/// `2023-01-05T13:45:00` form, with a date-only fallback at midnight.
fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(parsed);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight);
        }
    }
    anyhow::bail!("Invalid timestamp '{}'", raw)
}

// =============================================================================
// DIMENSION TRANSFORMER - locations
// =============================================================================

/// Raw location row as it appears in the source extract.
#[derive(Debug, Deserialize)]
struct RawLocation {
    location_id: String,
    city: String,
    latitude: f64,
    longitude: f64,
}

/// Finalized location dimension row.
#[derive(Debug, PartialEq, Serialize)]
struct Location {
    id: String,
    name: String,
    latitude: f64,
    longitude: f64,
}

fn parse_locations(content: &str) -> Result<Vec<RawLocation>> {
    let mut reader = csv_reader(content);
    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read headers from {}", LOCATIONS_FILENAME))?
        .clone();
    for required in ["location_id", "city", "latitude", "longitude"] {
        require_column(&headers, required, LOCATIONS_FILENAME)?;
    }

    let mut rows = Vec::new();
    for (line_idx, result) in reader.deserialize().enumerate() {
        let row: RawLocation = result
            .with_context(|| format!("Invalid location row at line {}", line_idx + 2))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Build the location dimension: mint surrogate keys over `location_id` and
/// rename the display-name column `city` to `name`.
fn build_locations(rows: &[RawLocation]) -> (Vec<Location>, KeyMap) {
    let natural_keys: Vec<String> = rows.iter().map(|r| r.location_id.clone()).collect();
    let keymap = mint_keys(&natural_keys);

    let locations = rows
        .iter()
        .map(|row| Location {
            id: keymap.resolve(&row.location_id).unwrap_or("").to_string(),
            name: row.city.clone(),
            latitude: row.latitude,
            longitude: row.longitude,
        })
        .collect();

    (locations, keymap)
}

// =============================================================================
// DIMENSION TRANSFORMER - products
// =============================================================================

/// One raw product row: the retained dimension fields plus the values of the
/// attribute columns, parallel to `ProductsInput::attribute_columns`.
#[derive(Debug)]
struct RawProduct {
    sku: String,
    category: String,
    perishability: String,
    attribute_values: Vec<String>,
}

/// Parsed products extract. The source carries an open-ended set of columns;
/// everything that is not a retained dimension column (or the natural key) is
/// an attribute column, captured here in header order so the reshaped output
/// keeps the source column ordering.
#[derive(Debug)]
struct ProductsInput {
    attribute_columns: Vec<String>,
    rows: Vec<RawProduct>,
}

fn parse_products(content: &str) -> Result<ProductsInput> {
    let mut reader = csv_reader(content);
    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read headers from {}", PRODUCTS_FILENAME))?
        .clone();
    let sku_col = require_column(&headers, "sku", PRODUCTS_FILENAME)?;
    let category_col = require_column(&headers, "category", PRODUCTS_FILENAME)?;
    let perishability_col = require_column(&headers, "perishability", PRODUCTS_FILENAME)?;

    let mut attribute_indexes = Vec::new();
    let mut attribute_columns = Vec::new();
    for (idx, header) in headers.iter().enumerate() {
        if idx != sku_col && idx != category_col && idx != perishability_col {
            attribute_indexes.push(idx);
            attribute_columns.push(header.to_string());
        }
    }

    let mut rows = Vec::new();
    for (line_idx, result) in reader.records().enumerate() {
        let record = result
            .with_context(|| format!("Invalid product row at line {}", line_idx + 2))?;
        rows.push(RawProduct {
            sku: record.get(sku_col).unwrap_or("").to_string(),
            category: record.get(category_col).unwrap_or("").to_string(),
            perishability: record.get(perishability_col).unwrap_or("").to_string(),
            attribute_values: attribute_indexes
                .iter()
                .map(|&idx| record.get(idx).unwrap_or("").to_string())
                .collect(),
        });
    }

    Ok(ProductsInput {
        attribute_columns,
        rows,
    })
}

/// Finalized product dimension row.
#[derive(Debug, PartialEq, Serialize)]
struct Product {
    id: String,
    category: String,
    is_perishable: bool,
}

/// One (product, attribute) pair of the long-format attributes table.
#[derive(Debug, PartialEq, Serialize)]
struct ProductAttribute {
    id: i64,
    product_id: String,
    attribute_name: String,
    attribute_value: String,
}

/// A product is perishable when the raw field equals the sentinel after
/// trimming and case folding.
fn is_perishable(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case(PERISHABLE_SENTINEL)
}

/// Build the product dimension and the long-format attributes table.
///
/// Attributes melt column-major: every product for the first attribute
/// column, then every product for the next, so the attribute ordering follows
/// the source header. Ids are sequential from 1 across the whole table.
fn build_products(input: &ProductsInput) -> (Vec<Product>, Vec<ProductAttribute>, KeyMap) {
    let natural_keys: Vec<String> = input.rows.iter().map(|r| r.sku.clone()).collect();
    let keymap = mint_keys(&natural_keys);

    let products = input
        .rows
        .iter()
        .map(|row| Product {
            id: keymap.resolve(&row.sku).unwrap_or("").to_string(),
            category: row.category.clone(),
            is_perishable: is_perishable(&row.perishability),
        })
        .collect();

    let mut attributes = Vec::new();
    let mut next_id: i64 = 1;
    for (col_idx, attribute_name) in input.attribute_columns.iter().enumerate() {
        for row in &input.rows {
            attributes.push(ProductAttribute {
                id: next_id,
                product_id: keymap.resolve(&row.sku).unwrap_or("").to_string(),
                attribute_name: attribute_name.clone(),
                attribute_value: row
                    .attribute_values
                    .get(col_idx)
                    .cloned()
                    .unwrap_or_default(),
            });
            next_id += 1;
        }
    }

    (products, attributes, keymap)
}

// =============================================================================
// FACT JOINER
// =============================================================================

/// Policy for fact rows whose natural key has no key-map entry.
#[derive(Debug, Clone, Copy, PartialEq)]
enum MissingKeyPolicy {
    /// Abort the stage after the full scan, reporting every offending key.
    Fail,
    /// Drop the row, count it, keep going.
    Skip,
}

impl MissingKeyPolicy {
    fn from_arg(raw: &str) -> Result<Self> {
        match raw {
            "fail" => Ok(Self::Fail),
            "skip" => Ok(Self::Skip),
            other => anyhow::bail!(
                "Unknown --on-missing-key value '{}'. Use 'fail' or 'skip'",
                other
            ),
        }
    }
}

/// Natural keys of one fact row, before resolution.
#[derive(Debug)]
struct FactKeys {
    sku: String,
    location_id: String,
}

/// Surrogate keys of one fact row, after resolution.
#[derive(Debug)]
struct ResolvedKeys {
    product_id: String,
    location_id: String,
}

/// Per-row resolution outcome. A row either resolves both keys or names the
/// keys it could not resolve; there is no null foreign key in between.
#[derive(Debug)]
enum KeyResolution {
    Resolved(ResolvedKeys),
    Unresolved {
        missing_sku: Option<String>,
        missing_location: Option<String>,
    },
}

fn resolve_keys(keys: &FactKeys, product_map: &KeyMap, location_map: &KeyMap) -> KeyResolution {
    match (
        product_map.resolve(&keys.sku),
        location_map.resolve(&keys.location_id),
    ) {
        (Some(product_id), Some(location_id)) => KeyResolution::Resolved(ResolvedKeys {
            product_id: product_id.to_string(),
            location_id: location_id.to_string(),
        }),
        (product, location) => KeyResolution::Unresolved {
            missing_sku: product.is_none().then(|| keys.sku.clone()),
            missing_location: location.is_none().then(|| keys.location_id.clone()),
        },
    }
}

/// Outcome of resolving one batch of fact rows.
#[derive(Debug, Default)]
struct JoinReport {
    resolved: usize,
    dropped: usize,
    missing_skus: BTreeSet<String>,
    missing_locations: BTreeSet<String>,
}

/// Resolve every row's natural keys against the two key maps, shared by the
/// sales and stock variants.
///
/// Under `Fail` any unresolved key aborts the batch after the full scan, so
/// the error reports the complete set of offending keys. Under `Skip` the
/// unresolved rows are dropped and counted; resolved rows keep input order.
fn resolve_fact_keys<T>(
    rows: Vec<(FactKeys, T)>,
    product_map: &KeyMap,
    location_map: &KeyMap,
    policy: MissingKeyPolicy,
    stage: &str,
) -> Result<(Vec<(ResolvedKeys, T)>, JoinReport)> {
    let mut resolved_rows = Vec::with_capacity(rows.len());
    let mut report = JoinReport::default();

    for (keys, payload) in rows {
        match resolve_keys(&keys, product_map, location_map) {
            KeyResolution::Resolved(resolved) => {
                report.resolved += 1;
                resolved_rows.push((resolved, payload));
            }
            KeyResolution::Unresolved {
                missing_sku,
                missing_location,
            } => {
                report.dropped += 1;
                report.missing_skus.extend(missing_sku);
                report.missing_locations.extend(missing_location);
            }
        }
    }

    if report.dropped > 0 {
        match policy {
            MissingKeyPolicy::Fail => anyhow::bail!(
                "KEY RESOLUTION: {} of {} {} row(s) reference unknown keys (skus: {:?}, locations: {:?})",
                report.dropped,
                report.resolved + report.dropped,
                stage,
                report.missing_skus,
                report.missing_locations,
            ),
            MissingKeyPolicy::Skip => eprintln!(
                "  ⚠ Dropped {} {} row(s) referencing unknown keys (skus: {:?}, locations: {:?})",
                report.dropped, stage, report.missing_skus, report.missing_locations
            ),
        }
    }

    Ok((resolved_rows, report))
}

// -----------------------------------------------------------------------------
// Sales variant
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawSale {
    sku: String,
    location_id: String,
    date: String,
    original_quantity: i64,
}

/// Timestamp and quantity of one raw sale, carried through key resolution.
#[derive(Debug)]
struct SalePayload {
    datetime: NaiveDateTime,
    quantity: i64,
}

/// Finalized sales fact row.
#[derive(Debug, PartialEq, Serialize)]
struct Sale {
    id: i64,
    datetime: String,
    product_id: String,
    location_id: String,
    quantity: i64,
}

fn parse_sales(content: &str) -> Result<Vec<(FactKeys, SalePayload)>> {
    let mut reader = csv_reader(content);
    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read headers from {}", SALES_FILENAME))?
        .clone();
    for required in ["sku", "location_id", "date", "original_quantity"] {
        require_column(&headers, required, SALES_FILENAME)?;
    }

    let mut rows = Vec::new();
    for (line_idx, result) in reader.deserialize().enumerate() {
        let row: RawSale =
            result.with_context(|| format!("Invalid sale row at line {}", line_idx + 2))?;
        let datetime = parse_timestamp(&row.date)
            .with_context(|| format!("Invalid sale timestamp at line {}", line_idx + 2))?;
        rows.push((
            FactKeys {
                sku: row.sku,
                location_id: row.location_id,
            },
            SalePayload {
                datetime,
                quantity: row.original_quantity,
            },
        ));
    }
    Ok(rows)
}

/// Join sales facts: resolve both foreign keys, rename `date` to `datetime`
/// and `original_quantity` to `quantity`, assign sequential ids from 1.
fn build_sales(
    rows: Vec<(FactKeys, SalePayload)>,
    product_map: &KeyMap,
    location_map: &KeyMap,
    policy: MissingKeyPolicy,
) -> Result<(Vec<Sale>, JoinReport)> {
    let (resolved, report) = resolve_fact_keys(rows, product_map, location_map, policy, "sales")?;

    let sales = resolved
        .into_iter()
        .enumerate()
        .map(|(idx, (keys, payload))| Sale {
            id: idx as i64 + 1,
            datetime: payload.datetime.format(DATETIME_FORMAT).to_string(),
            product_id: keys.product_id,
            location_id: keys.location_id,
            quantity: payload.quantity,
        })
        .collect();

    Ok((sales, report))
}

// -----------------------------------------------------------------------------
// Stock variant
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawStock {
    sku: String,
    location_id: String,
    date_at: String,
    available_quantity: i64,
}

/// Calendar date and quantity of one raw stock level.
#[derive(Debug)]
struct StockPayload {
    date: NaiveDate,
    quantity: i64,
}

/// Finalized stock fact row. Stock levels have no surrogate id of their own;
/// the natural key is the (date, product, location) composite.
#[derive(Debug, PartialEq, Serialize)]
struct Stock {
    date: NaiveDate,
    product_id: String,
    location_id: String,
    quantity: i64,
}

fn parse_stocks(content: &str) -> Result<Vec<(FactKeys, StockPayload)>> {
    let mut reader = csv_reader(content);
    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read headers from {}", STOCKS_FILENAME))?
        .clone();
    for required in ["sku", "location_id", "date_at", "available_quantity"] {
        require_column(&headers, required, STOCKS_FILENAME)?;
    }

    let mut rows = Vec::new();
    for (line_idx, result) in reader.deserialize().enumerate() {
        let row: RawStock =
            result.with_context(|| format!("Invalid stock row at line {}", line_idx + 2))?;
        // Stock timestamps truncate to a calendar date
        let date = parse_timestamp(&row.date_at)
            .with_context(|| format!("Invalid stock timestamp at line {}", line_idx + 2))?
            .date();
        rows.push((
            FactKeys {
                sku: row.sku,
                location_id: row.location_id,
            },
            StockPayload {
                date,
                quantity: row.available_quantity,
            },
        ));
    }
    Ok(rows)
}

/// Join stock facts: resolve both foreign keys, truncate `date_at` to a date,
/// rename `available_quantity` to `quantity`.
fn build_stocks(
    rows: Vec<(FactKeys, StockPayload)>,
    product_map: &KeyMap,
    location_map: &KeyMap,
    policy: MissingKeyPolicy,
) -> Result<(Vec<Stock>, JoinReport)> {
    let (resolved, report) = resolve_fact_keys(rows, product_map, location_map, policy, "stocks")?;

    let stocks = resolved
        .into_iter()
        .map(|(keys, payload)| Stock {
            date: payload.date,
            product_id: keys.product_id,
            location_id: keys.location_id,
            quantity: payload.quantity,
        })
        .collect();

    Ok((stocks, report))
}

// =============================================================================
// PIPELINES
// =============================================================================

/// Ensure the result and cache folders exist.
async fn setup_folders(config: &Config) -> Result<()> {
    fs::create_dir_all(&config.result_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.result_dir.display()))?;
    fs::create_dir_all(&config.cache_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.cache_dir.display()))?;
    Ok(())
}

async fn read_input(config: &Config, filename: &str) -> Result<String> {
    let path = config.data_dir.join(filename);
    println!("  Reading {}", path.display());
    fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

async fn locations_pipeline(config: &Config, dry_run: bool) -> Result<usize> {
    let content = read_input(config, LOCATIONS_FILENAME).await?;
    let rows = parse_locations(&content)?;
    println!("  Parsed {} location row(s)", rows.len());

    let (locations, keymap) = build_locations(&rows);

    if dry_run {
        println!(
            "  Dry run - would write {} location(s) and {} key map entries",
            locations.len(),
            keymap.len()
        );
        return Ok(locations.len());
    }

    let output_path = config.result_dir.join(LOCATIONS_FILENAME);
    write_table(&output_path, &["id", "name", "latitude", "longitude"], &locations)?;
    println!("  ✓ Locations table saved to {}", output_path.display());

    let keymap_path = config.location_keymap_path();
    keymap.save(&keymap_path).await?;
    println!("  ✓ Location key map saved to {}", keymap_path.display());

    Ok(locations.len())
}

async fn products_pipeline(config: &Config, dry_run: bool) -> Result<usize> {
    let content = read_input(config, PRODUCTS_FILENAME).await?;
    let input = parse_products(&content)?;
    println!(
        "  Parsed {} product row(s) with {} attribute column(s): {:?}",
        input.rows.len(),
        input.attribute_columns.len(),
        input.attribute_columns
    );

    let (products, attributes, keymap) = build_products(&input);

    if dry_run {
        println!(
            "  Dry run - would write {} product(s) and {} attribute row(s)",
            products.len(),
            attributes.len()
        );
        return Ok(products.len());
    }

    let products_path = config.result_dir.join(PRODUCTS_FILENAME);
    write_table(&products_path, &["id", "category", "is_perishable"], &products)?;
    println!("  ✓ Products table saved to {}", products_path.display());

    let attributes_path = config.result_dir.join(PRODUCT_ATTRIBUTES_FILENAME);
    write_table(
        &attributes_path,
        &["id", "product_id", "attribute_name", "attribute_value"],
        &attributes,
    )?;
    println!(
        "  ✓ Product attributes table saved to {}",
        attributes_path.display()
    );

    let keymap_path = config.product_keymap_path();
    keymap.save(&keymap_path).await?;
    println!("  ✓ Product key map saved to {}", keymap_path.display());

    Ok(products.len())
}

async fn sales_pipeline(
    config: &Config,
    policy: MissingKeyPolicy,
    dry_run: bool,
) -> Result<usize> {
    let product_map = KeyMap::load(&config.product_keymap_path()).await?;
    let location_map = KeyMap::load(&config.location_keymap_path()).await?;

    let content = read_input(config, SALES_FILENAME).await?;
    let rows = parse_sales(&content)?;
    println!("  Parsed {} sale row(s)", rows.len());

    let (sales, report) = build_sales(rows, &product_map, &location_map, policy)?;
    println!("  Resolved {} row(s), dropped {}", report.resolved, report.dropped);

    if dry_run {
        println!("  Dry run - would write {} sale(s)", sales.len());
        return Ok(sales.len());
    }

    let output_path = config.result_dir.join(SALES_FILENAME);
    write_table(
        &output_path,
        &["id", "datetime", "product_id", "location_id", "quantity"],
        &sales,
    )?;
    println!("  ✓ Sales table saved to {}", output_path.display());

    Ok(sales.len())
}

async fn stocks_pipeline(
    config: &Config,
    policy: MissingKeyPolicy,
    dry_run: bool,
) -> Result<usize> {
    let product_map = KeyMap::load(&config.product_keymap_path()).await?;
    let location_map = KeyMap::load(&config.location_keymap_path()).await?;

    let content = read_input(config, STOCKS_FILENAME).await?;
    let rows = parse_stocks(&content)?;
    println!("  Parsed {} stock row(s)", rows.len());

    let (stocks, report) = build_stocks(rows, &product_map, &location_map, policy)?;
    println!("  Resolved {} row(s), dropped {}", report.resolved, report.dropped);

    if dry_run {
        println!("  Dry run - would write {} stock level(s)", stocks.len());
        return Ok(stocks.len());
    }

    let output_path = config.result_dir.join(STOCKS_FILENAME);
    write_table(
        &output_path,
        &["date", "product_id", "location_id", "quantity"],
        &stocks,
    )?;
    println!("  ✓ Historical stocks table saved to {}", output_path.display());

    Ok(stocks.len())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Config::from_env();
    let policy = MissingKeyPolicy::from_arg(&args.on_missing_key)?;

    if !STAGES.contains(&args.stage.as_str()) {
        anyhow::bail!(
            "Unknown stage '{}'. Use one of: {}",
            args.stage,
            STAGES.join(", ")
        );
    }

    println!("=== Retail Mart Preparer ===");
    println!("Data dir:   {}", config.data_dir.display());
    println!("Result dir: {}", config.result_dir.display());
    println!("Cache dir:  {}", config.cache_dir.display());
    println!("Stage: {}", args.stage);
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    if !args.dry_run {
        setup_folders(&config).await?;
    }

    let run_all = args.stage == "all";
    let mut total_rows = 0;

    if run_all || args.stage == "locations" {
        println!("\n[locations]");
        total_rows += locations_pipeline(&config, args.dry_run).await?;
    }
    if run_all || args.stage == "products" {
        println!("\n[products]");
        total_rows += products_pipeline(&config, args.dry_run).await?;
    }
    if run_all || args.stage == "sales" {
        println!("\n[sales]");
        total_rows += sales_pipeline(&config, policy, args.dry_run).await?;
    }
    if run_all || args.stage == "stocks" {
        println!("\n[stocks]");
        total_rows += stocks_pipeline(&config, policy, args.dry_run).await?;
    }

    println!("\n=== Preparation Complete ===");
    println!("Result rows written: {}", total_rows);

    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
