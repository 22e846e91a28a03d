use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, SchemaError};

/// One input row as handed over by the loader: header -> cell text.
pub type RawRow = BTreeMap<String, String>;

pub const TITLE: &str = "title";
pub const PRICE: &str = "price";
pub const QUANTITY: &str = "quantity";
pub const SELLER: &str = "seller";
pub const REGION: &str = "region";
pub const LISTING_AGE: &str = "listing_age";
pub const SOURCE_URL: &str = "source_url";
pub const SOURCE_TYPE: &str = "source_type";
pub const BULK_NOTES: &str = "bulk_notes";

/// The canonical header set every cleaned row is expressed in
pub const CANONICAL_HEADERS: [&str; 9] = [
    TITLE,
    PRICE,
    QUANTITY,
    SELLER,
    REGION,
    LISTING_AGE,
    SOURCE_URL,
    SOURCE_TYPE,
    BULK_NOTES,
];

static PRICE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").unwrap());
static FIRST_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static AGE_WITH_UNIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+(?:\.\d+)?)\s*([a-z]*)").unwrap());
static HEADER_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-.]+").unwrap());

/// A listing as read from the scrape, with canonical fields and cleaned values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    /// Position of the row in the input batch
    pub row: usize,
    pub title: String,
    /// `None` when the cell was empty, non-numeric or not positive
    pub price: Option<f64>,
    pub quantity: u32,
    pub seller: Option<String>,
    pub region: Option<String>,
    /// Age of the listing in days
    pub listing_age_days: Option<f64>,
    pub source_url: Option<String>,
    pub source_type: Option<String>,
    pub bulk_notes: Option<String>,
}

/// Configuration for header resolution and required fields
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    /// Variant header -> canonical header
    pub header_aliases: BTreeMap<String, String>,
    /// Canonical headers every row must resolve
    pub required_headers: Vec<String>,
    /// Canonical fields that must also carry a non-blank value
    pub non_empty_fields: Vec<String>,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        let header_aliases = [
            ("name", TITLE),
            ("listing_title", TITLE),
            ("product", TITLE),
            ("item", TITLE),
            ("cost", PRICE),
            ("price_usd", PRICE),
            ("amount", PRICE),
            ("asking_price", PRICE),
            ("qty", QUANTITY),
            ("count", QUANTITY),
            ("units", QUANTITY),
            ("vendor", SELLER),
            ("seller_name", SELLER),
            ("merchant", SELLER),
            ("location", REGION),
            ("country", REGION),
            ("age", LISTING_AGE),
            ("posted", LISTING_AGE),
            ("days_listed", LISTING_AGE),
            ("url", SOURCE_URL),
            ("link", SOURCE_URL),
            ("source", SOURCE_TYPE),
            ("marketplace", SOURCE_TYPE),
            ("notes", BULK_NOTES),
            ("bulk", BULK_NOTES),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            header_aliases,
            required_headers: vec![TITLE.to_string(), PRICE.to_string()],
            non_empty_fields: vec![TITLE.to_string()],
        }
    }
}

impl CleanerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (variant, canonical) in &self.header_aliases {
            if !CANONICAL_HEADERS.contains(&canonical.as_str()) {
                return Err(ConfigError::InvalidHeaderMap(format!(
                    "'{}' maps to unknown canonical header '{}'",
                    variant, canonical
                )));
            }
        }
        for header in self.required_headers.iter().chain(&self.non_empty_fields) {
            if !CANONICAL_HEADERS.contains(&header.as_str()) {
                return Err(ConfigError::InvalidHeaderMap(format!(
                    "required header '{}' is not a canonical header",
                    header
                )));
            }
        }
        Ok(())
    }
}

/// A rejected row and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRejection {
    pub row: usize,
    pub error: SchemaError,
}

/// Row-level outcome of the cleaner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanReport {
    pub input_rows: usize,
    pub accepted: usize,
    pub rejections: Vec<RowRejection>,
    /// Headers that matched neither a variant nor a canonical name
    pub unknown_headers: BTreeSet<String>,
}

impl CleanReport {
    pub fn rejected(&self) -> usize {
        self.rejections.len()
    }
}

/// Resolves header variants and cleans cell values
#[derive(Debug, Clone)]
pub struct Cleaner {
    aliases: HashMap<String, String>,
    required_headers: Vec<String>,
    non_empty_fields: Vec<String>,
}

impl Cleaner {
    pub fn new(config: &CleanerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let aliases = config
            .header_aliases
            .iter()
            .map(|(variant, canonical)| (normalize_header(variant), canonical.clone()))
            .collect();
        Ok(Self {
            aliases,
            required_headers: config.required_headers.clone(),
            non_empty_fields: config.non_empty_fields.clone(),
        })
    }

    /// Clean a batch. Rows that fail schema checks are dropped and reported.
    pub fn clean(&self, rows: &[RawRow]) -> (Vec<RawListing>, CleanReport) {
        let mut report = CleanReport {
            input_rows: rows.len(),
            ..Default::default()
        };
        let mut listings = Vec::with_capacity(rows.len());

        for (index, row) in rows.iter().enumerate() {
            match self.clean_row(index, row, &mut report.unknown_headers) {
                Ok(listing) => listings.push(listing),
                Err(error) => {
                    warn!("Rejected input row: {}", error);
                    report.rejections.push(RowRejection { row: index, error });
                }
            }
        }

        report.accepted = listings.len();
        info!(
            "Cleaner accepted {} of {} rows ({} rejected, {} unknown headers)",
            report.accepted,
            report.input_rows,
            report.rejected(),
            report.unknown_headers.len()
        );
        (listings, report)
    }

    /// Map a raw header onto its canonical name, if it has one.
    pub fn resolve_header(&self, header: &str) -> Option<&str> {
        let key = normalize_header(header);
        if let Some(canonical) = self.aliases.get(&key) {
            return Some(canonical.as_str());
        }
        CANONICAL_HEADERS.iter().copied().find(|c| *c == key)
    }

    fn clean_row(
        &self,
        index: usize,
        row: &RawRow,
        unknown: &mut BTreeSet<String>,
    ) -> Result<RawListing, SchemaError> {
        // canonical header -> (came from the canonical header itself, value)
        let mut resolved: HashMap<&str, (bool, String)> = HashMap::new();

        for (header, value) in row {
            let Some(canonical) = self.resolve_header(header) else {
                unknown.insert(header.trim().to_string());
                continue;
            };
            let direct = normalize_header(header) == canonical;
            let value = collapse_whitespace(value);
            let slot = resolved.entry(canonical).or_insert((false, String::new()));
            // A literal canonical header beats a variant; otherwise first non-empty wins.
            if slot.1.is_empty() || (direct && !slot.0 && !value.is_empty()) {
                *slot = (direct, value);
            }
        }

        for header in &self.required_headers {
            if !resolved.contains_key(header.as_str()) {
                return Err(SchemaError::MissingHeader {
                    row: index,
                    header: header.clone(),
                });
            }
        }
        for field in &self.non_empty_fields {
            if resolved.get(field.as_str()).map_or(true, |(_, v)| v.is_empty()) {
                return Err(SchemaError::EmptyField {
                    row: index,
                    field: field.clone(),
                });
            }
        }

        let mut take = |name: &str| -> Option<String> {
            resolved
                .remove(name)
                .map(|(_, v)| v)
                .filter(|v| !v.is_empty())
        };

        let title = take(TITLE).unwrap_or_default();
        let price_text = take(PRICE);
        let price = price_text.as_deref().and_then(parse_price);
        if price.is_none() {
            debug!(row = index, raw = ?price_text, "Price missing or unparseable");
        }

        Ok(RawListing {
            row: index,
            title,
            price,
            quantity: take(QUANTITY).as_deref().and_then(parse_quantity).unwrap_or(1),
            seller: take(SELLER),
            region: take(REGION).map(|r| r.to_lowercase()),
            listing_age_days: take(LISTING_AGE).as_deref().and_then(parse_listing_age),
            source_url: take(SOURCE_URL),
            source_type: take(SOURCE_TYPE).map(|s| s.to_lowercase()),
            bulk_notes: take(BULK_NOTES),
        })
    }
}

/// Lowercase and turn whitespace, dash and dot runs into underscores.
pub fn normalize_header(header: &str) -> String {
    HEADER_SEPARATORS
        .replace_all(header.trim(), "_")
        .trim_matches('_')
        .to_lowercase()
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a price such as `$3,199.00` or `USD 3199`. Commas are thousands
/// separators. Negative, zero and non-numeric values yield `None`.
pub fn parse_price(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.starts_with('-') {
        return None;
    }
    let number = PRICE_NUMBER.find(text)?;
    let value: f64 = number.as_str().replace(',', "").parse().ok()?;
    (value.is_finite() && value > 0.0).then_some(value)
}

pub fn parse_quantity(text: &str) -> Option<u32> {
    let digits = FIRST_INTEGER.find(text)?;
    digits.as_str().parse::<u32>().ok().filter(|q| *q > 0)
}

/// Parse a listing age into days: `3`, `3d`, `2 weeks`, `5 hours ago`, `today`.
pub fn parse_listing_age(text: &str) -> Option<f64> {
    let text = text.trim().to_lowercase();
    if matches!(text.as_str(), "today" | "new" | "just now") {
        return Some(0.0);
    }
    let caps = AGE_WITH_UNIT.captures(&text)?;
    let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
    let days_per_unit = match caps.get(2).map_or("", |m| m.as_str()) {
        "" | "d" | "day" | "days" => 1.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 1.0 / 24.0,
        "min" | "mins" | "minute" | "minutes" => 1.0 / 1440.0,
        "w" | "wk" | "wks" | "week" | "weeks" => 7.0,
        "mo" | "month" | "months" => 30.0,
        "y" | "yr" | "yrs" | "year" | "years" => 365.0,
        _ => return None,
    };
    Some(amount * days_per_unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn cleaner() -> Cleaner {
        Cleaner::new(&CleanerConfig::default()).unwrap()
    }

    #[test]
    fn test_variant_headers_resolve_to_canonical_fields() {
        let rows = vec![row(&[
            ("Listing Title", "  NVIDIA   RTX 6000 Ada  "),
            ("Price-USD", "$3,199.00"),
            ("Qty", "2"),
            ("Vendor", " gpu-surplus "),
            ("Location", "US-West"),
            ("Days Listed", "3 days"),
            ("Marketplace", "eBay"),
        ])];

        let (listings, report) = cleaner().clean(&rows);
        assert_eq!(report.accepted, 1);
        assert!(report.unknown_headers.is_empty());

        let listing = &listings[0];
        assert_eq!(listing.title, "NVIDIA RTX 6000 Ada");
        assert_eq!(listing.price, Some(3199.0));
        assert_eq!(listing.quantity, 2);
        assert_eq!(listing.seller.as_deref(), Some("gpu-surplus"));
        assert_eq!(listing.region.as_deref(), Some("us-west"));
        assert_eq!(listing.listing_age_days, Some(3.0));
        assert_eq!(listing.source_type.as_deref(), Some("ebay"));
    }

    #[test]
    fn test_missing_required_header_rejects_row_only() {
        let rows = vec![
            row(&[("title", "NVIDIA L4"), ("price", "2400")]),
            row(&[("title", "NVIDIA L4")]),
            row(&[("price", "100")]),
        ];

        let (listings, report) = cleaner().clean(&rows);
        assert_eq!(listings.len(), 1);
        assert_eq!(report.rejected(), 2);
        assert_eq!(
            report.rejections[0].error,
            SchemaError::MissingHeader {
                row: 1,
                header: "price".to_string()
            }
        );
        assert_eq!(report.rejections[1].row, 2);
    }

    #[test]
    fn test_blank_title_is_rejected_but_bad_price_is_kept() {
        let rows = vec![
            row(&[("title", "   "), ("price", "10")]),
            row(&[("title", "Tesla T4"), ("price", "call for price")]),
        ];

        let (listings, report) = cleaner().clean(&rows);
        assert!(matches!(report.rejections[0].error, SchemaError::EmptyField { row: 0, .. }));
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].row, 1);
        assert_eq!(listings[0].price, None);
    }

    #[test]
    fn test_unknown_headers_are_reported() {
        let rows = vec![row(&[("title", "A2"), ("price", "900"), ("Shipping", "free")])];
        let (_, report) = cleaner().clean(&rows);
        assert!(report.unknown_headers.contains("Shipping"));
    }

    #[test]
    fn test_canonical_header_beats_variant() {
        let rows = vec![row(&[("name", "variant title"), ("title", "canonical title"), ("price", "1")])];
        let (listings, _) = cleaner().clean(&rows);
        assert_eq!(listings[0].title, "canonical title");
    }

    #[test]
    fn test_cleaning_is_idempotent_on_canonical_input() {
        let rows = vec![row(&[("title", "NVIDIA A2"), ("price", "999.5"), ("seller", "acme")])];
        let (first, _) = cleaner().clean(&rows);
        let again = vec![row(&[
            ("title", first[0].title.as_str()),
            ("price", "999.5"),
            ("seller", first[0].seller.as_deref().unwrap()),
        ])];
        let (second, _) = cleaner().clean(&again);
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_price_variants() {
        assert_eq!(parse_price("$3,205.00"), Some(3205.0));
        assert_eq!(parse_price("USD 799"), Some(799.0));
        assert_eq!(parse_price("0"), None);
        assert_eq!(parse_price("-5"), None);
        assert_eq!(parse_price("n/a"), None);
    }

    #[test]
    fn test_parse_listing_age_units() {
        assert_eq!(parse_listing_age("3"), Some(3.0));
        assert_eq!(parse_listing_age("2 weeks ago"), Some(14.0));
        assert_eq!(parse_listing_age("12h"), Some(0.5));
        assert_eq!(parse_listing_age("1 month"), Some(30.0));
        assert_eq!(parse_listing_age("Today"), Some(0.0));
        assert_eq!(parse_listing_age("soon"), None);
    }

    #[test]
    fn test_header_map_must_target_canonical_headers() {
        let mut config = CleanerConfig::default();
        config.header_aliases.insert("gpu".into(), "model".into());
        assert!(matches!(Cleaner::new(&config), Err(ConfigError::InvalidHeaderMap(_))));
    }
}
