//! Locale value coercers - raw Argentine-Spanish cell text into typed values
//!
//! Spreadsheets arrive with "1.234,56" numbers, "$" prefixes, "si/no"
//! booleans and free-text enum synonyms. Every function here is pure and
//! total: bad input yields None (or the documented default), never a panic.

use serde::{Deserialize, Serialize};

/// IVA rates legally valid in Argentina. Anything else on an import is a
/// data-entry mistake, not a new rate.
pub const IVA_RATES: &[f64] = &[0.0, 2.5, 5.0, 10.5, 21.0, 27.0];

/// How far a parsed rate may sit from a whitelisted one and still snap to it.
const IVA_RATE_TOLERANCE: f64 = 0.1;

const AFFIRMATIVE_WORDS: &[&str] = &["si", "sí", "yes", "true", "1", "activo"];
const NEGATIVE_WORDS: &[&str] = &["no", "false", "0", "inactivo"];

/// Parse a number written with the local convention: "." groups thousands,
/// "," marks decimals, an optional "$" prefixes currency.
///
/// "1.234,56" -> 1234.56, "$ 1.000,00" -> 1000.0, "" -> None
pub fn parse_locale_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != '.' && !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a boolean cell. Accepts the spanish/english affirmative and
/// negative words the templates document; anything else is None.
pub fn parse_locale_bool(raw: &str) -> Option<bool> {
    let word = raw.trim().to_lowercase();
    if AFFIRMATIVE_WORDS.contains(&word.as_str()) {
        return Some(true);
    }
    if NEGATIVE_WORDS.contains(&word.as_str()) {
        return Some(false);
    }
    None
}

/// Where a product is visible: sales, purchases, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    #[default]
    SalesAndPurchases,
    Sales,
    Purchases,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::SalesAndPurchases => "SALES_AND_PURCHASES",
            Visibility::Sales => "SALES",
            Visibility::Purchases => "PURCHASES",
        }
    }
}

/// Resolve a visibility cell by synonym. Rules are ordered and match by
/// substring; the first hit wins. Unrecognized text is None.
pub fn parse_visibility(raw: &str) -> Option<Visibility> {
    let text = raw.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }
    if text.contains("ambos") || text.contains("both") {
        return Some(Visibility::SalesAndPurchases);
    }
    if text.contains("venta") {
        return Some(Visibility::Sales);
    }
    if text.contains("compra") {
        return Some(Visibility::Purchases);
    }
    None
}

/// What kind of item a catalog row is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductType {
    #[default]
    Product,
    Service,
    Combo,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Product => "PRODUCT",
            ProductType::Service => "SERVICE",
            ProductType::Combo => "COMBO",
        }
    }
}

/// Resolve a product-type cell by synonym. Always resolves: anything that
/// is not a service or a combo is a plain product.
pub fn parse_product_type(raw: &str) -> ProductType {
    let text = raw.trim().to_lowercase();
    if text.contains("servicio") {
        return ProductType::Service;
    }
    if text.contains("combo") {
        return ProductType::Combo;
    }
    ProductType::Product
}

/// Parse a tax-rate cell onto the IVA whitelist.
///
/// Users write "21", "21%", "21,00" or the fraction "0.21"; all resolve to
/// 21. A value that lands on no whitelisted rate is None.
pub fn parse_tax_rate(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '%' && !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    align_tax_rate(cleaned.parse::<f64>().ok()?)
}

/// Snap a numeric rate onto the IVA whitelist. Fractions strictly between
/// 0 and 1 are taken as decimal form (0.21 means 21%) and scaled first.
pub fn align_tax_rate(value: f64) -> Option<f64> {
    let percent = if value > 0.0 && value < 1.0 {
        value * 100.0
    } else {
        value
    };
    IVA_RATES
        .iter()
        .copied()
        .find(|rate| (rate - percent).abs() <= IVA_RATE_TOLERANCE)
}

// =============================================================================
// TESTS
// =============================================================================
