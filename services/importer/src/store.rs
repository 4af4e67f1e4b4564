//! Store boundary - the persistence contract the reconciliation engine
//! writes through
//!
//! The engine owns matching, caching and create-vs-update decisions;
//! implementations own persistence. Every operation is scoped by org.
//!
//! Update payloads are sparse: a None field means "leave it alone", so a
//! blank spreadsheet cell can never erase stored data.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::values::{ProductType, Visibility};

#[derive(Debug, Clone, Serialize)]
pub struct CategoryRecord {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
}

/// A customer or a supplier: same shape, different tables.
#[derive(Debug, Clone, Serialize)]
pub struct PartyRecord {
    pub id: Uuid,
    pub name: String,
    pub tax_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationRecord {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductRecord {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
}

/// Everything a new product needs. Fields the upload left blank arrive
/// here already defaulted.
#[derive(Debug, Clone, Default)]
pub struct ProductDraft {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    pub price: f64,
    pub cost: f64,
    pub tax_rate: Option<f64>,
    pub barcode: Option<String>,
    pub visibility: Visibility,
    pub product_type: ProductType,
}

#[derive(Debug, Clone, Default)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    pub price: Option<f64>,
    pub cost: Option<f64>,
    pub tax_rate: Option<f64>,
    pub barcode: Option<String>,
    pub visibility: Option<Visibility>,
    pub product_type: Option<ProductType>,
}

impl ProductPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.category_id.is_none()
            && self.supplier_id.is_none()
            && self.price.is_none()
            && self.cost.is_none()
            && self.tax_rate.is_none()
            && self.barcode.is_none()
            && self.visibility.is_none()
            && self.product_type.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PartyDraft {
    pub name: String,
    pub tax_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PartyPatch {
    pub name: Option<String>,
    pub tax_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // ---- categories ----
    async fn list_categories(&self, org_id: Uuid) -> Result<Vec<CategoryRecord>>;
    async fn create_category(
        &self,
        org_id: Uuid,
        name: &str,
        parent_id: Option<Uuid>,
    ) -> Result<CategoryRecord>;

    // ---- suppliers ----
    async fn list_suppliers(&self, org_id: Uuid) -> Result<Vec<PartyRecord>>;
    async fn find_supplier_by_tax_id(&self, org_id: Uuid, tax_id: &str)
        -> Result<Option<PartyRecord>>;
    /// Case-insensitive exact name match.
    async fn find_supplier_by_name(&self, org_id: Uuid, name: &str)
        -> Result<Option<PartyRecord>>;
    async fn create_supplier(&self, org_id: Uuid, draft: &PartyDraft) -> Result<PartyRecord>;
    async fn update_supplier(&self, org_id: Uuid, id: Uuid, patch: &PartyPatch) -> Result<()>;

    // ---- customers ----
    async fn find_customer_by_tax_id(&self, org_id: Uuid, tax_id: &str)
        -> Result<Option<PartyRecord>>;
    /// Case-insensitive exact name match.
    async fn find_customer_by_name(&self, org_id: Uuid, name: &str)
        -> Result<Option<PartyRecord>>;
    async fn create_customer(&self, org_id: Uuid, draft: &PartyDraft) -> Result<PartyRecord>;
    async fn update_customer(&self, org_id: Uuid, id: Uuid, patch: &PartyPatch) -> Result<()>;

    // ---- products ----
    async fn find_product_by_sku(&self, org_id: Uuid, sku: &str) -> Result<Option<ProductRecord>>;
    async fn create_product(&self, org_id: Uuid, draft: &ProductDraft) -> Result<ProductRecord>;
    async fn update_product(&self, org_id: Uuid, id: Uuid, patch: &ProductPatch) -> Result<()>;

    // ---- locations and stock ----
    async fn list_locations(&self, org_id: Uuid) -> Result<Vec<LocationRecord>>;
    /// Absolute set: the stored quantity becomes `quantity`, creating the
    /// stock record if none exists.
    async fn set_stock(
        &self,
        org_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        quantity: f64,
    ) -> Result<()>;
}
