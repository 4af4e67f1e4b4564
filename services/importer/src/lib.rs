//! Importer - spreadsheet bulk-import pipeline for the back office
//!
//! Responsibilities:
//! - Define the per-entity upload templates (sheet name, ordered columns)
//! - Parse workbook/CSV uploads into validated generic rows
//! - Reconcile validated rows against the store (create vs update by
//!   natural key, name resolution, sparse updates)
//! - Generate blank templates and corrective error workbooks
//!
//! CRITICAL: row handling must be per-row isolated. One bad row is
//! reported and skipped; it never aborts the batch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod memory;
pub mod parse;
pub mod reconcile;
pub mod store;
pub mod template;
pub mod values;
pub mod workbook;

pub use parse::{parse, CellValue, ParseResult, ParsedRow};
pub use reconcile::{reconcile, ImportResult, ImportRowError};
pub use template::{template_for, TemplateColumn, TemplateDefinition};
pub use workbook::{generate_error_file, generate_template};

/// The five spreadsheet import targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Products,
    Stock,
    Prices,
    Customers,
    Suppliers,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::Products,
        EntityType::Stock,
        EntityType::Prices,
        EntityType::Customers,
        EntityType::Suppliers,
    ];

    /// Stable tag used on the wire, in the CLI and in the audit trail.
    pub fn tag(&self) -> &'static str {
        match self {
            EntityType::Products => "products",
            EntityType::Stock => "stock",
            EntityType::Prices => "prices",
            EntityType::Customers => "customers",
            EntityType::Suppliers => "suppliers",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "products" => Ok(EntityType::Products),
            "stock" => Ok(EntityType::Stock),
            "prices" => Ok(EntityType::Prices),
            "customers" => Ok(EntityType::Customers),
            "suppliers" => Ok(EntityType::Suppliers),
            other => anyhow::bail!(
                "Unknown entity type: '{}' (expected products, stock, prices, customers or suppliers)",
                other
            ),
        }
    }
}
