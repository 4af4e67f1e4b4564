//! Reconciliation engine - validated rows into store mutations
//!
//! Responsibilities:
//! - Route each row through its entity-specific import path
//! - Decide create vs update by natural key (SKU; CUIT then name)
//! - Resolve category/supplier/location names, accent-insensitively
//! - Apply sparse updates: a blank cell never erases stored data
//! - Isolate failures per row; the batch always runs to completion
//!
//! Rows are processed strictly in submitted order, one store call at a
//! time, so per-run caches and counters need no synchronization.

use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, Result};
use serde::Serialize;
use tracing::{debug, info, warn};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::parse::{CellValue, ParsedRow};
use crate::store::{
    CategoryRecord, LocationRecord, PartyDraft, PartyPatch, PartyRecord, ProductDraft,
    ProductPatch, Store,
};
use crate::values::{parse_product_type, parse_visibility, ProductType, Visibility};
use crate::EntityType;

/// Joins multiple error strings for one row, here and in the error file.
pub(crate) const ERROR_JOINER: &str = "; ";

#[derive(Debug, Clone, Serialize)]
pub struct ImportRowError {
    pub row_number: usize,
    /// Snapshot of the row's value map, for the error workbook.
    pub data: BTreeMap<&'static str, CellValue>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportResult {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub errors: Vec<ImportRowError>,
}

impl ImportResult {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.failed
    }

    pub fn summary(&self) -> String {
        format!(
            "{} created, {} updated, {} failed",
            self.created, self.updated, self.failed
        )
    }

    fn count(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Created => self.created += 1,
            RowOutcome::Updated => self.updated += 1,
        }
    }

    fn fail_row(&mut self, row: &ParsedRow, error: String) {
        warn!(row = row.row_number, error = %error, "import row failed");
        self.failed += 1;
        self.errors.push(ImportRowError {
            row_number: row.row_number,
            data: row.data.clone(),
            error,
        });
    }
}

enum RowOutcome {
    Created,
    Updated,
}

/// Reconcile parsed rows against the store, sequentially and in order.
///
/// Rows that arrive with parse errors fail immediately and never reach the
/// store. Per-row store failures are recorded and the batch continues; only
/// the up-front catalog loads can fail the call itself.
pub async fn reconcile(
    store: &dyn Store,
    org_id: Uuid,
    entity: EntityType,
    rows: &[ParsedRow],
) -> Result<ImportResult> {
    info!(entity = %entity, rows = rows.len(), "starting reconciliation");
    let mut result = ImportResult::default();
    match entity {
        EntityType::Products => reconcile_products(store, org_id, rows, &mut result).await?,
        EntityType::Stock => reconcile_stock(store, org_id, rows, &mut result).await?,
        EntityType::Prices => reconcile_prices(store, org_id, rows, &mut result).await?,
        EntityType::Customers => reconcile_customers(store, org_id, rows, &mut result).await?,
        EntityType::Suppliers => reconcile_suppliers(store, org_id, rows, &mut result).await?,
    }
    info!(
        entity = %entity,
        created = result.created,
        updated = result.updated,
        failed = result.failed,
        "reconciliation finished"
    );
    Ok(result)
}

// =============================================================================
// NAME RESOLUTION
// =============================================================================

/// Accent-stripped comparison form: NFD with combining marks removed, then
/// lowercased. "Bebídas" and "bebidas" fold to the same string.
pub(crate) fn fold_accents(name: &str) -> String {
    name.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Two-pass name match: case-insensitive exact first, accent-stripped
/// second. What happens on a miss (create, fail, leave unset) is the
/// caller's policy.
fn match_name<'a, T>(items: &'a [T], name: &str, item_name: impl Fn(&T) -> &str) -> Option<&'a T> {
    let wanted = name.trim().to_lowercase();
    if let Some(hit) = items.iter().find(|i| item_name(i).to_lowercase() == wanted) {
        return Some(hit);
    }
    let folded = fold_accents(name.trim());
    items
        .iter()
        .find(|i| fold_accents(item_name(i)) == folded)
}

/// Per-run category view: the org's categories as loaded (plus our own
/// creations), and a cache of resolved names.
///
/// Cache keys are lowercased names: a top-level category caches under
/// "<cat>", a subcategory under "<cat>/<sub>". The top-level key is
/// intentionally not parent-namespaced.
struct CategoryCache {
    known: Vec<CategoryRecord>,
    resolved: HashMap<String, Uuid>,
}

impl CategoryCache {
    async fn load(store: &dyn Store, org_id: Uuid) -> Result<Self> {
        Ok(CategoryCache {
            known: store.list_categories(org_id).await?,
            resolved: HashMap::new(),
        })
    }

    async fn resolve_top(&mut self, store: &dyn Store, org_id: Uuid, name: &str) -> Result<Uuid> {
        let key = name.trim().to_lowercase();
        if let Some(id) = self.resolved.get(&key) {
            return Ok(*id);
        }

        let found = {
            let tops: Vec<&CategoryRecord> = self
                .known
                .iter()
                .filter(|c| c.parent_id.is_none())
                .collect();
            match_name(&tops, name, |c| c.name.as_str()).map(|c| c.id)
        };
        let id = match found {
            Some(id) => id,
            None => {
                let created = store.create_category(org_id, name.trim(), None).await?;
                debug!(category = name, "created category");
                let id = created.id;
                self.known.push(created);
                id
            }
        };
        self.resolved.insert(key, id);
        Ok(id)
    }

    async fn resolve_sub(
        &mut self,
        store: &dyn Store,
        org_id: Uuid,
        parent_id: Uuid,
        parent_name: &str,
        name: &str,
    ) -> Result<Uuid> {
        let key = format!(
            "{}/{}",
            parent_name.trim().to_lowercase(),
            name.trim().to_lowercase()
        );
        if let Some(id) = self.resolved.get(&key) {
            return Ok(*id);
        }

        let found = {
            let subs: Vec<&CategoryRecord> = self
                .known
                .iter()
                .filter(|c| c.parent_id == Some(parent_id))
                .collect();
            match_name(&subs, name, |c| c.name.as_str()).map(|c| c.id)
        };
        let id = match found {
            Some(id) => id,
            None => {
                let created = store
                    .create_category(org_id, name.trim(), Some(parent_id))
                    .await?;
                debug!(category = name, parent = parent_name, "created subcategory");
                let id = created.id;
                self.known.push(created);
                id
            }
        };
        self.resolved.insert(key, id);
        Ok(id)
    }
}

// =============================================================================
// PRODUCTS
// =============================================================================

struct ProductRow {
    sku: String,
    name: String,
    description: Option<String>,
    category: Option<String>,
    subcategory: Option<String>,
    price: Option<f64>,
    cost: Option<f64>,
    tax_rate: Option<f64>,
    supplier: Option<String>,
    barcode: Option<String>,
    visibility: Option<Visibility>,
    product_type: Option<ProductType>,
}

impl ProductRow {
    fn from_parsed(row: &ParsedRow) -> Result<Self> {
        Ok(ProductRow {
            sku: row
                .string("sku")
                .ok_or_else(|| anyhow!("Código SKU es obligatorio"))?,
            name: row
                .string("name")
                .ok_or_else(|| anyhow!("Nombre es obligatorio"))?,
            description: row.string("description"),
            category: row.string("category"),
            subcategory: row.string("subcategory"),
            price: row.number("price"),
            cost: row.number("cost"),
            tax_rate: row.value("tax_rate").and_then(CellValue::as_tax_rate),
            supplier: row.string("supplier"),
            barcode: row.string("barcode"),
            visibility: row.string("visibility").and_then(|s| parse_visibility(&s)),
            product_type: row.string("product_type").map(|s| parse_product_type(&s)),
        })
    }
}

async fn reconcile_products(
    store: &dyn Store,
    org_id: Uuid,
    rows: &[ParsedRow],
    result: &mut ImportResult,
) -> Result<()> {
    let suppliers = store.list_suppliers(org_id).await?;
    let mut categories = CategoryCache::load(store, org_id).await?;

    for row in rows {
        if !row.is_valid() {
            result.fail_row(row, row.errors.join(ERROR_JOINER));
            continue;
        }
        match import_product_row(store, org_id, row, &mut categories, &suppliers).await {
            Ok(outcome) => result.count(outcome),
            Err(e) => result.fail_row(row, e.to_string()),
        }
    }
    Ok(())
}

async fn import_product_row(
    store: &dyn Store,
    org_id: Uuid,
    row: &ParsedRow,
    categories: &mut CategoryCache,
    suppliers: &[PartyRecord],
) -> Result<RowOutcome> {
    let fields = ProductRow::from_parsed(row)?;

    // the product points at the deepest resolved category level
    let mut category_id = None;
    if let Some(category) = &fields.category {
        let top = categories.resolve_top(store, org_id, category).await?;
        category_id = Some(top);
        if let Some(subcategory) = &fields.subcategory {
            category_id = Some(
                categories
                    .resolve_sub(store, org_id, top, category, subcategory)
                    .await?,
            );
        }
    }

    // suppliers are matched, never created; a miss leaves the field unset
    let supplier_id = match &fields.supplier {
        Some(name) => {
            let hit = match_name(suppliers, name, |s| s.name.as_str()).map(|s| s.id);
            if hit.is_none() {
                debug!(supplier = %name, "supplier not found, leaving unset");
            }
            hit
        }
        None => None,
    };

    match store.find_product_by_sku(org_id, &fields.sku).await? {
        Some(existing) => {
            let patch = ProductPatch {
                name: Some(fields.name),
                description: fields.description,
                category_id,
                supplier_id,
                price: fields.price,
                cost: fields.cost,
                tax_rate: fields.tax_rate,
                barcode: fields.barcode,
                visibility: fields.visibility,
                product_type: fields.product_type,
            };
            store.update_product(org_id, existing.id, &patch).await?;
            Ok(RowOutcome::Updated)
        }
        None => {
            let draft = ProductDraft {
                sku: fields.sku,
                name: fields.name,
                description: fields.description,
                category_id,
                supplier_id,
                price: fields.price.unwrap_or(0.0),
                cost: fields.cost.unwrap_or(0.0),
                tax_rate: fields.tax_rate,
                barcode: fields.barcode,
                visibility: fields.visibility.unwrap_or_default(),
                product_type: fields.product_type.unwrap_or_default(),
            };
            store.create_product(org_id, &draft).await?;
            Ok(RowOutcome::Created)
        }
    }
}

// =============================================================================
// STOCK
// =============================================================================

async fn reconcile_stock(
    store: &dyn Store,
    org_id: Uuid,
    rows: &[ParsedRow],
    result: &mut ImportResult,
) -> Result<()> {
    let locations = store.list_locations(org_id).await?;

    for row in rows {
        if !row.is_valid() {
            result.fail_row(row, row.errors.join(ERROR_JOINER));
            continue;
        }
        match import_stock_row(store, org_id, row, &locations).await {
            Ok(outcome) => result.count(outcome),
            Err(e) => result.fail_row(row, e.to_string()),
        }
    }
    Ok(())
}

async fn import_stock_row(
    store: &dyn Store,
    org_id: Uuid,
    row: &ParsedRow,
    locations: &[LocationRecord],
) -> Result<RowOutcome> {
    let sku = row
        .string("sku")
        .ok_or_else(|| anyhow!("Código SKU es obligatorio"))?;
    let quantity = row
        .number("quantity")
        .ok_or_else(|| anyhow!("Cantidad es obligatorio"))?;

    let product = store
        .find_product_by_sku(org_id, &sku)
        .await?
        .ok_or_else(|| anyhow!("Producto con SKU \"{}\" no encontrado", sku))?;

    let location_id = match row.string("location") {
        Some(name) => match_name(locations, &name, |l| l.name.as_str())
            .map(|l| l.id)
            .ok_or_else(|| anyhow!("Ubicación \"{}\" no encontrada", name))?,
        None => locations
            .first()
            .map(|l| l.id)
            .ok_or_else(|| anyhow!("No hay ubicaciones configuradas"))?,
    };

    // absolute set, not an increment
    store
        .set_stock(org_id, product.id, location_id, quantity)
        .await?;
    Ok(RowOutcome::Updated)
}

// =============================================================================
// PRICES
// =============================================================================

async fn reconcile_prices(
    store: &dyn Store,
    org_id: Uuid,
    rows: &[ParsedRow],
    result: &mut ImportResult,
) -> Result<()> {
    for row in rows {
        if !row.is_valid() {
            result.fail_row(row, row.errors.join(ERROR_JOINER));
            continue;
        }
        match import_price_row(store, org_id, row).await {
            Ok(outcome) => result.count(outcome),
            Err(e) => result.fail_row(row, e.to_string()),
        }
    }
    Ok(())
}

async fn import_price_row(store: &dyn Store, org_id: Uuid, row: &ParsedRow) -> Result<RowOutcome> {
    let sku = row
        .string("sku")
        .ok_or_else(|| anyhow!("Código SKU es obligatorio"))?;

    let product = store
        .find_product_by_sku(org_id, &sku)
        .await?
        .ok_or_else(|| anyhow!("Producto con SKU \"{}\" no encontrado", sku))?;

    let patch = ProductPatch {
        price: row.number("price"),
        cost: row.number("cost"),
        ..ProductPatch::default()
    };
    if !patch.is_empty() {
        store.update_product(org_id, product.id, &patch).await?;
    }
    Ok(RowOutcome::Updated)
}

// =============================================================================
// CUSTOMERS AND SUPPLIERS
// =============================================================================

struct PartyRow {
    name: String,
    tax_id: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    address: Option<String>,
}

impl PartyRow {
    fn from_parsed(row: &ParsedRow) -> Result<Self> {
        Ok(PartyRow {
            name: row
                .string("name")
                .ok_or_else(|| anyhow!("Nombre es obligatorio"))?,
            tax_id: row.string("tax_id"),
            email: row.string("email"),
            phone: row.string("phone"),
            address: row.string("address"),
        })
    }

    fn draft(self) -> PartyDraft {
        PartyDraft {
            name: self.name,
            tax_id: self.tax_id,
            email: self.email,
            phone: self.phone,
            address: self.address,
        }
    }

    fn patch(self) -> PartyPatch {
        PartyPatch {
            name: Some(self.name),
            tax_id: self.tax_id,
            email: self.email,
            phone: self.phone,
            address: self.address,
        }
    }
}

async fn reconcile_customers(
    store: &dyn Store,
    org_id: Uuid,
    rows: &[ParsedRow],
    result: &mut ImportResult,
) -> Result<()> {
    for row in rows {
        if !row.is_valid() {
            result.fail_row(row, row.errors.join(ERROR_JOINER));
            continue;
        }
        match import_customer_row(store, org_id, row).await {
            Ok(outcome) => result.count(outcome),
            Err(e) => result.fail_row(row, e.to_string()),
        }
    }
    Ok(())
}

async fn import_customer_row(
    store: &dyn Store,
    org_id: Uuid,
    row: &ParsedRow,
) -> Result<RowOutcome> {
    let fields = PartyRow::from_parsed(row)?;

    // natural key: CUIT when present, case-insensitive name otherwise
    let mut existing = None;
    if let Some(tax_id) = &fields.tax_id {
        existing = store.find_customer_by_tax_id(org_id, tax_id).await?;
    }
    if existing.is_none() {
        existing = store.find_customer_by_name(org_id, &fields.name).await?;
    }

    match existing {
        Some(customer) => {
            store
                .update_customer(org_id, customer.id, &fields.patch())
                .await?;
            Ok(RowOutcome::Updated)
        }
        None => {
            store.create_customer(org_id, &fields.draft()).await?;
            Ok(RowOutcome::Created)
        }
    }
}

async fn reconcile_suppliers(
    store: &dyn Store,
    org_id: Uuid,
    rows: &[ParsedRow],
    result: &mut ImportResult,
) -> Result<()> {
    for row in rows {
        if !row.is_valid() {
            result.fail_row(row, row.errors.join(ERROR_JOINER));
            continue;
        }
        match import_supplier_row(store, org_id, row).await {
            Ok(outcome) => result.count(outcome),
            Err(e) => result.fail_row(row, e.to_string()),
        }
    }
    Ok(())
}

async fn import_supplier_row(
    store: &dyn Store,
    org_id: Uuid,
    row: &ParsedRow,
) -> Result<RowOutcome> {
    let fields = PartyRow::from_parsed(row)?;

    let mut existing = None;
    if let Some(tax_id) = &fields.tax_id {
        existing = store.find_supplier_by_tax_id(org_id, tax_id).await?;
    }
    if existing.is_none() {
        existing = store.find_supplier_by_name(org_id, &fields.name).await?;
    }

    match existing {
        Some(supplier) => {
            store
                .update_supplier(org_id, supplier.id, &fields.patch())
                .await?;
            Ok(RowOutcome::Updated)
        }
        None => {
            store.create_supplier(org_id, &fields.draft()).await?;
            Ok(RowOutcome::Created)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn org() -> Uuid {
        Uuid::new_v4()
    }

    fn row(row_number: usize, cells: &[(&'static str, &str)]) -> ParsedRow {
        let mut data = BTreeMap::new();
        for (key, value) in cells {
            data.insert(*key, CellValue::Text(value.to_string()));
        }
        ParsedRow {
            row_number,
            data,
            errors: Vec::new(),
        }
    }

    fn numeric(mut parsed: ParsedRow, key: &'static str, value: f64) -> ParsedRow {
        parsed.data.insert(key, CellValue::Number(value));
        parsed
    }

    // -------------------------------------------------------------------------
    // NAME MATCHING TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_fold_accents() {
        assert_eq!(fold_accents("Bebídas"), "bebidas");
        assert_eq!(fold_accents("Ñandú"), "nandu");
        assert_eq!(fold_accents("FERRETERÍA"), "ferreteria");
    }

    #[test]
    fn test_match_name_two_passes() {
        let locations = vec![
            LocationRecord {
                id: Uuid::new_v4(),
                name: "Depósito Central".to_string(),
            },
            LocationRecord {
                id: Uuid::new_v4(),
                name: "Sucursal Norte".to_string(),
            },
        ];
        // pass 1: case-insensitive exact
        let hit = match_name(&locations, "depósito central", |l| l.name.as_str());
        assert_eq!(hit.map(|l| l.id), Some(locations[0].id));
        // pass 2: accent-stripped
        let hit = match_name(&locations, "Deposito Central", |l| l.name.as_str());
        assert_eq!(hit.map(|l| l.id), Some(locations[0].id));
        // miss
        assert!(match_name(&locations, "Otro", |l| l.name.as_str()).is_none());
    }

    // -------------------------------------------------------------------------
    // PRODUCT TESTS
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_products_create_with_category_chain() {
        let store = MemoryStore::new();
        let org = org();
        let rows = vec![numeric(
            row(
                4,
                &[
                    ("sku", "A1"),
                    ("name", "Tornillo"),
                    ("category", "Ferretería"),
                    ("subcategory", "Tornillos"),
                ],
            ),
            "price",
            121.0,
        )];

        let result = reconcile(&store, org, EntityType::Products, &rows)
            .await
            .unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.updated, 0);
        assert_eq!(result.failed, 0);

        let categories = store.categories(org);
        assert_eq!(categories.len(), 2);
        let top = categories.iter().find(|c| c.name == "Ferretería").unwrap();
        let sub = categories.iter().find(|c| c.name == "Tornillos").unwrap();
        assert_eq!(sub.parent_id, Some(top.id));

        let product = store.product_by_sku(org, "A1").unwrap();
        assert_eq!(product.category_id, Some(sub.id));
        assert_eq!(product.price, 121.0);
        assert_eq!(product.cost, 0.0);
    }

    #[tokio::test]
    async fn test_products_second_import_updates() {
        let store = MemoryStore::new();
        let org = org();
        let rows = vec![row(4, &[("sku", "A1"), ("name", "Tornillo")])];

        let first = reconcile(&store, org, EntityType::Products, &rows)
            .await
            .unwrap();
        assert_eq!((first.created, first.updated), (1, 0));

        let second = reconcile(&store, org, EntityType::Products, &rows)
            .await
            .unwrap();
        assert_eq!((second.created, second.updated), (0, 1));
    }

    #[tokio::test]
    async fn test_products_sparse_update_keeps_existing_values() {
        let store = MemoryStore::new();
        let org = org();
        let full = vec![numeric(
            numeric(
                row(4, &[("sku", "A1"), ("name", "Tornillo"), ("category", "Ferretería")]),
                "price",
                121.0,
            ),
            "cost",
            80.0,
        )];
        reconcile(&store, org, EntityType::Products, &full)
            .await
            .unwrap();

        // re-import with only SKU and a new name
        let sparse = vec![row(4, &[("sku", "A1"), ("name", "Tornillo 8mm")])];
        let result = reconcile(&store, org, EntityType::Products, &sparse)
            .await
            .unwrap();
        assert_eq!(result.updated, 1);

        let product = store.product_by_sku(org, "A1").unwrap();
        assert_eq!(product.name, "Tornillo 8mm");
        assert_eq!(product.price, 121.0);
        assert_eq!(product.cost, 80.0);
        assert!(product.category_id.is_some());
    }

    #[tokio::test]
    async fn test_category_matched_accent_insensitively_not_duplicated() {
        let store = MemoryStore::new();
        let org = org();
        let seeded = store.seed_category(org, "Bebidas", None);

        let rows = vec![row(
            4,
            &[("sku", "B1"), ("name", "Agua"), ("category", "bebídas")],
        )];
        reconcile(&store, org, EntityType::Products, &rows)
            .await
            .unwrap();

        assert_eq!(store.categories(org).len(), 1);
        let product = store.product_by_sku(org, "B1").unwrap();
        assert_eq!(product.category_id, Some(seeded));
    }

    #[tokio::test]
    async fn test_category_created_once_per_run() {
        let store = MemoryStore::new();
        let org = org();
        let rows = vec![
            row(4, &[("sku", "B1"), ("name", "Agua"), ("category", "Bebidas")]),
            row(5, &[("sku", "B2"), ("name", "Soda"), ("category", "bebidas")]),
        ];
        reconcile(&store, org, EntityType::Products, &rows)
            .await
            .unwrap();
        assert_eq!(store.categories(org).len(), 1);
    }

    #[tokio::test]
    async fn test_supplier_resolved_or_silently_unset() {
        let store = MemoryStore::new();
        let org = org();
        let supplier_id = store.seed_supplier(org, "Distribuidora Sur", None);

        let rows = vec![
            row(
                4,
                &[("sku", "A1"), ("name", "Tornillo"), ("supplier", "distribuidora sur")],
            ),
            row(
                5,
                &[("sku", "A2"), ("name", "Tuerca"), ("supplier", "No Existe SA")],
            ),
        ];
        let result = reconcile(&store, org, EntityType::Products, &rows)
            .await
            .unwrap();
        // the unknown supplier is not a row failure
        assert_eq!(result.created, 2);
        assert_eq!(result.failed, 0);

        assert_eq!(store.product_by_sku(org, "A1").unwrap().supplier_id, Some(supplier_id));
        assert_eq!(store.product_by_sku(org, "A2").unwrap().supplier_id, None);
    }

    #[tokio::test]
    async fn test_parse_errors_fail_fast_and_skip_the_store() {
        let store = MemoryStore::new();
        let org = org();
        let mut bad = row(4, &[("sku", "A1")]);
        bad.errors.push("Nombre es obligatorio".to_string());
        let rows = vec![bad, row(5, &[("sku", "A2"), ("name", "Tuerca")])];

        let result = reconcile(&store, org, EntityType::Products, &rows)
            .await
            .unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.total(), rows.len());
        assert_eq!(result.errors[0].row_number, 4);
        assert_eq!(result.errors[0].error, "Nombre es obligatorio");
        // the invalid row never reached the store
        assert!(store.product_by_sku(org, "A1").is_none());
    }

    // -------------------------------------------------------------------------
    // STOCK TESTS
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_stock_absolute_set() {
        let store = MemoryStore::new();
        let org = org();
        let location = store.seed_location(org, "Depósito");
        let product = store.seed_product(org, "A1", "Tornillo");
        store.set_stock(org, product, location, 50.0).await.unwrap();

        let rows = vec![numeric(row(4, &[("sku", "A1")]), "quantity", 10.0)];
        let result = reconcile(&store, org, EntityType::Stock, &rows)
            .await
            .unwrap();
        assert_eq!(result.updated, 1);
        // replaced, not incremented
        assert_eq!(store.stock_quantity(org, "A1", location), Some(10.0));
    }

    #[tokio::test]
    async fn test_stock_unknown_product_fails_row() {
        let store = MemoryStore::new();
        let org = org();
        store.seed_location(org, "Depósito");

        let rows = vec![numeric(row(4, &[("sku", "NADA")]), "quantity", 5.0)];
        let result = reconcile(&store, org, EntityType::Stock, &rows)
            .await
            .unwrap();
        assert_eq!(result.failed, 1);
        assert_eq!(
            result.errors[0].error,
            "Producto con SKU \"NADA\" no encontrado"
        );
    }

    #[tokio::test]
    async fn test_stock_unknown_location_fails_row() {
        let store = MemoryStore::new();
        let org = org();
        store.seed_location(org, "Depósito");
        store.seed_product(org, "A1", "Tornillo");

        let rows = vec![numeric(
            row(4, &[("sku", "A1"), ("location", "Altillo")]),
            "quantity",
            5.0,
        )];
        let result = reconcile(&store, org, EntityType::Stock, &rows)
            .await
            .unwrap();
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors[0].error, "Ubicación \"Altillo\" no encontrada");
    }

    #[tokio::test]
    async fn test_stock_blank_location_uses_first() {
        let store = MemoryStore::new();
        let org = org();
        let first = store.seed_location(org, "Depósito");
        store.seed_location(org, "Sucursal");
        store.seed_product(org, "A1", "Tornillo");

        let rows = vec![numeric(row(4, &[("sku", "A1")]), "quantity", 7.0)];
        reconcile(&store, org, EntityType::Stock, &rows)
            .await
            .unwrap();
        assert_eq!(store.stock_quantity(org, "A1", first), Some(7.0));
    }

    #[tokio::test]
    async fn test_stock_no_locations_configured() {
        let store = MemoryStore::new();
        let org = org();
        store.seed_product(org, "A1", "Tornillo");

        let rows = vec![numeric(row(4, &[("sku", "A1")]), "quantity", 7.0)];
        let result = reconcile(&store, org, EntityType::Stock, &rows)
            .await
            .unwrap();
        assert_eq!(result.errors[0].error, "No hay ubicaciones configuradas");
    }

    // -------------------------------------------------------------------------
    // PRICE TESTS
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_prices_update_only_present_fields() {
        let store = MemoryStore::new();
        let org = org();
        let product = store.seed_product(org, "A1", "Tornillo");
        store
            .update_product(
                org,
                product,
                &ProductPatch {
                    price: Some(100.0),
                    cost: Some(60.0),
                    ..ProductPatch::default()
                },
            )
            .await
            .unwrap();

        let rows = vec![numeric(row(4, &[("sku", "A1")]), "price", 150.0)];
        let result = reconcile(&store, org, EntityType::Prices, &rows)
            .await
            .unwrap();
        assert_eq!(result.updated, 1);

        let stored = store.product_by_sku(org, "A1").unwrap();
        assert_eq!(stored.price, 150.0);
        assert_eq!(stored.cost, 60.0);
    }

    #[tokio::test]
    async fn test_prices_cannot_create_products() {
        let store = MemoryStore::new();
        let org = org();
        let rows = vec![numeric(row(4, &[("sku", "NUEVO")]), "price", 10.0)];
        let result = reconcile(&store, org, EntityType::Prices, &rows)
            .await
            .unwrap();
        assert_eq!(result.failed, 1);
        assert!(result.errors[0].error.contains("NUEVO"));
        assert!(store.product_by_sku(org, "NUEVO").is_none());
    }

    // -------------------------------------------------------------------------
    // CUSTOMER AND SUPPLIER TESTS
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_customers_keyed_by_cuit_then_name() {
        let store = MemoryStore::new();
        let org = org();

        let create = vec![row(
            4,
            &[("name", "Juan Pérez"), ("tax_id", "20-12345678-9")],
        )];
        let result = reconcile(&store, org, EntityType::Customers, &create)
            .await
            .unwrap();
        assert_eq!(result.created, 1);

        // same CUIT, different name: matched by CUIT, name updated
        let update = vec![row(
            4,
            &[("name", "Juan P. Pérez"), ("tax_id", "20-12345678-9")],
        )];
        let result = reconcile(&store, org, EntityType::Customers, &update)
            .await
            .unwrap();
        assert_eq!((result.created, result.updated), (0, 1));
        assert_eq!(store.customer_count(org), 1);
        assert!(store.customer_by_name(org, "Juan P. Pérez").is_some());
    }

    #[tokio::test]
    async fn test_customers_name_fallback_is_case_insensitive() {
        let store = MemoryStore::new();
        let org = org();
        let create = vec![row(4, &[("name", "Juan Pérez")])];
        reconcile(&store, org, EntityType::Customers, &create)
            .await
            .unwrap();

        let update = vec![row(4, &[("name", "juan pérez"), ("email", "jp@example.com")])];
        let result = reconcile(&store, org, EntityType::Customers, &update)
            .await
            .unwrap();
        assert_eq!((result.created, result.updated), (0, 1));
        assert_eq!(store.customer_count(org), 1);
        assert_eq!(
            store.customer_by_name(org, "Juan Pérez").unwrap().email,
            Some("jp@example.com".to_string())
        );
    }

    #[tokio::test]
    async fn test_suppliers_import_roundtrip() {
        let store = MemoryStore::new();
        let org = org();
        let rows = vec![row(
            4,
            &[("name", "Distribuidora Sur"), ("tax_id", "30-87654321-0")],
        )];

        let first = reconcile(&store, org, EntityType::Suppliers, &rows)
            .await
            .unwrap();
        assert_eq!(first.created, 1);
        let second = reconcile(&store, org, EntityType::Suppliers, &rows)
            .await
            .unwrap();
        assert_eq!((second.created, second.updated), (0, 1));
        assert!(store.supplier_by_name(org, "Distribuidora Sur").is_some());
    }

    #[tokio::test]
    async fn test_blank_tax_id_does_not_erase_stored_one() {
        let store = MemoryStore::new();
        let org = org();
        let create = vec![row(
            4,
            &[("name", "Juan Pérez"), ("tax_id", "20-12345678-9")],
        )];
        reconcile(&store, org, EntityType::Customers, &create)
            .await
            .unwrap();

        let update = vec![row(4, &[("name", "Juan Pérez")])];
        reconcile(&store, org, EntityType::Customers, &update)
            .await
            .unwrap();
        assert_eq!(
            store.customer_by_name(org, "Juan Pérez").unwrap().tax_id,
            Some("20-12345678-9".to_string())
        );
    }
}
