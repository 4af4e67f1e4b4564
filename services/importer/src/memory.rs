//! In-memory store - backs the test suites
//!
//! Same contract as the real database store, including the org scoping
//! and the duplicate-SKU rejection, so engine behavior can be exercised
//! without a connection. Seed and inspection helpers are synchronous.

use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::store::{
    CategoryRecord, LocationRecord, PartyDraft, PartyPatch, PartyRecord, ProductDraft,
    ProductPatch, ProductRecord, Store,
};
use crate::values::{ProductType, Visibility};

#[derive(Debug, Clone)]
pub struct StoredProduct {
    pub org_id: Uuid,
    pub id: Uuid,
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

#[derive(Debug, Clone)]
pub struct StoredParty {
    pub org_id: Uuid,
    pub id: Uuid,
    pub name: String,
    pub tax_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredCategory {
    pub org_id: Uuid,
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
struct StoredLocation {
    org_id: Uuid,
    id: Uuid,
    name: String,
}

#[derive(Debug, Clone)]
struct StoredStock {
    org_id: Uuid,
    product_id: Uuid,
    location_id: Uuid,
    quantity: f64,
}

#[derive(Debug, Default)]
struct State {
    categories: Vec<StoredCategory>,
    suppliers: Vec<StoredParty>,
    customers: Vec<StoredParty>,
    locations: Vec<StoredLocation>,
    products: Vec<StoredProduct>,
    stock: Vec<StoredStock>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---- seeding ----

    pub fn seed_location(&self, org_id: Uuid, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state().locations.push(StoredLocation {
            org_id,
            id,
            name: name.to_string(),
        });
        id
    }

    pub fn seed_category(&self, org_id: Uuid, name: &str, parent_id: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.state().categories.push(StoredCategory {
            org_id,
            id,
            name: name.to_string(),
            parent_id,
        });
        id
    }

    pub fn seed_supplier(&self, org_id: Uuid, name: &str, tax_id: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        self.state().suppliers.push(StoredParty {
            org_id,
            id,
            name: name.to_string(),
            tax_id: tax_id.map(str::to_string),
            email: None,
            phone: None,
            address: None,
        });
        id
    }

    pub fn seed_product(&self, org_id: Uuid, sku: &str, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state().products.push(StoredProduct {
            org_id,
            id,
            sku: sku.to_string(),
            name: name.to_string(),
            description: None,
            category_id: None,
            supplier_id: None,
            price: 0.0,
            cost: 0.0,
            tax_rate: None,
            barcode: None,
            visibility: Visibility::default(),
            product_type: ProductType::default(),
        });
        id
    }

    // ---- inspection ----

    pub fn product_by_sku(&self, org_id: Uuid, sku: &str) -> Option<StoredProduct> {
        self.state()
            .products
            .iter()
            .find(|p| p.org_id == org_id && p.sku == sku)
            .cloned()
    }

    pub fn categories(&self, org_id: Uuid) -> Vec<StoredCategory> {
        self.state()
            .categories
            .iter()
            .filter(|c| c.org_id == org_id)
            .cloned()
            .collect()
    }

    pub fn customer_by_name(&self, org_id: Uuid, name: &str) -> Option<StoredParty> {
        self.state()
            .customers
            .iter()
            .find(|p| p.org_id == org_id && p.name.to_lowercase() == name.to_lowercase())
            .cloned()
    }

    pub fn supplier_by_name(&self, org_id: Uuid, name: &str) -> Option<StoredParty> {
        self.state()
            .suppliers
            .iter()
            .find(|p| p.org_id == org_id && p.name.to_lowercase() == name.to_lowercase())
            .cloned()
    }

    pub fn customer_count(&self, org_id: Uuid) -> usize {
        self.state()
            .customers
            .iter()
            .filter(|p| p.org_id == org_id)
            .count()
    }

    pub fn stock_quantity(&self, org_id: Uuid, sku: &str, location_id: Uuid) -> Option<f64> {
        let state = self.state();
        let product = state
            .products
            .iter()
            .find(|p| p.org_id == org_id && p.sku == sku)?;
        state
            .stock
            .iter()
            .find(|s| {
                s.org_id == org_id && s.product_id == product.id && s.location_id == location_id
            })
            .map(|s| s.quantity)
    }
}

fn apply_party_patch(party: &mut StoredParty, patch: &PartyPatch) {
    if let Some(name) = &patch.name {
        party.name = name.clone();
    }
    if let Some(tax_id) = &patch.tax_id {
        party.tax_id = Some(tax_id.clone());
    }
    if let Some(email) = &patch.email {
        party.email = Some(email.clone());
    }
    if let Some(phone) = &patch.phone {
        party.phone = Some(phone.clone());
    }
    if let Some(address) = &patch.address {
        party.address = Some(address.clone());
    }
}

fn party_record(party: &StoredParty) -> PartyRecord {
    PartyRecord {
        id: party.id,
        name: party.name.clone(),
        tax_id: party.tax_id.clone(),
    }
}

fn stored_party(org_id: Uuid, draft: &PartyDraft) -> StoredParty {
    StoredParty {
        org_id,
        id: Uuid::new_v4(),
        name: draft.name.clone(),
        tax_id: draft.tax_id.clone(),
        email: draft.email.clone(),
        phone: draft.phone.clone(),
        address: draft.address.clone(),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_categories(&self, org_id: Uuid) -> Result<Vec<CategoryRecord>> {
        Ok(self
            .state()
            .categories
            .iter()
            .filter(|c| c.org_id == org_id)
            .map(|c| CategoryRecord {
                id: c.id,
                name: c.name.clone(),
                parent_id: c.parent_id,
            })
            .collect())
    }

    async fn create_category(
        &self,
        org_id: Uuid,
        name: &str,
        parent_id: Option<Uuid>,
    ) -> Result<CategoryRecord> {
        let id = self.seed_category(org_id, name, parent_id);
        Ok(CategoryRecord {
            id,
            name: name.to_string(),
            parent_id,
        })
    }

    async fn list_suppliers(&self, org_id: Uuid) -> Result<Vec<PartyRecord>> {
        Ok(self
            .state()
            .suppliers
            .iter()
            .filter(|p| p.org_id == org_id)
            .map(party_record)
            .collect())
    }

    async fn find_supplier_by_tax_id(
        &self,
        org_id: Uuid,
        tax_id: &str,
    ) -> Result<Option<PartyRecord>> {
        Ok(self
            .state()
            .suppliers
            .iter()
            .find(|p| p.org_id == org_id && p.tax_id.as_deref() == Some(tax_id))
            .map(party_record))
    }

    async fn find_supplier_by_name(&self, org_id: Uuid, name: &str) -> Result<Option<PartyRecord>> {
        Ok(self
            .state()
            .suppliers
            .iter()
            .find(|p| p.org_id == org_id && p.name.to_lowercase() == name.to_lowercase())
            .map(party_record))
    }

    async fn create_supplier(&self, org_id: Uuid, draft: &PartyDraft) -> Result<PartyRecord> {
        let party = stored_party(org_id, draft);
        let record = party_record(&party);
        self.state().suppliers.push(party);
        Ok(record)
    }

    async fn update_supplier(&self, org_id: Uuid, id: Uuid, patch: &PartyPatch) -> Result<()> {
        let mut state = self.state();
        match state
            .suppliers
            .iter_mut()
            .find(|p| p.org_id == org_id && p.id == id)
        {
            Some(party) => {
                apply_party_patch(party, patch);
                Ok(())
            }
            None => bail!("supplier {} not found", id),
        }
    }

    async fn find_customer_by_tax_id(
        &self,
        org_id: Uuid,
        tax_id: &str,
    ) -> Result<Option<PartyRecord>> {
        Ok(self
            .state()
            .customers
            .iter()
            .find(|p| p.org_id == org_id && p.tax_id.as_deref() == Some(tax_id))
            .map(party_record))
    }

    async fn find_customer_by_name(&self, org_id: Uuid, name: &str) -> Result<Option<PartyRecord>> {
        Ok(self
            .state()
            .customers
            .iter()
            .find(|p| p.org_id == org_id && p.name.to_lowercase() == name.to_lowercase())
            .map(party_record))
    }

    async fn create_customer(&self, org_id: Uuid, draft: &PartyDraft) -> Result<PartyRecord> {
        let party = stored_party(org_id, draft);
        let record = party_record(&party);
        self.state().customers.push(party);
        Ok(record)
    }

    async fn update_customer(&self, org_id: Uuid, id: Uuid, patch: &PartyPatch) -> Result<()> {
        let mut state = self.state();
        match state
            .customers
            .iter_mut()
            .find(|p| p.org_id == org_id && p.id == id)
        {
            Some(party) => {
                apply_party_patch(party, patch);
                Ok(())
            }
            None => bail!("customer {} not found", id),
        }
    }

    async fn find_product_by_sku(&self, org_id: Uuid, sku: &str) -> Result<Option<ProductRecord>> {
        Ok(self
            .state()
            .products
            .iter()
            .find(|p| p.org_id == org_id && p.sku == sku)
            .map(|p| ProductRecord {
                id: p.id,
                sku: p.sku.clone(),
                name: p.name.clone(),
            }))
    }

    async fn create_product(&self, org_id: Uuid, draft: &ProductDraft) -> Result<ProductRecord> {
        let mut state = self.state();
        if state
            .products
            .iter()
            .any(|p| p.org_id == org_id && p.sku == draft.sku)
        {
            bail!("duplicate SKU '{}'", draft.sku);
        }
        let id = Uuid::new_v4();
        state.products.push(StoredProduct {
            org_id,
            id,
            sku: draft.sku.clone(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            category_id: draft.category_id,
            supplier_id: draft.supplier_id,
            price: draft.price,
            cost: draft.cost,
            tax_rate: draft.tax_rate,
            barcode: draft.barcode.clone(),
            visibility: draft.visibility,
            product_type: draft.product_type,
        });
        Ok(ProductRecord {
            id,
            sku: draft.sku.clone(),
            name: draft.name.clone(),
        })
    }

    async fn update_product(&self, org_id: Uuid, id: Uuid, patch: &ProductPatch) -> Result<()> {
        let mut state = self.state();
        let product = match state
            .products
            .iter_mut()
            .find(|p| p.org_id == org_id && p.id == id)
        {
            Some(p) => p,
            None => bail!("product {} not found", id),
        };
        if let Some(name) = &patch.name {
            product.name = name.clone();
        }
        if let Some(description) = &patch.description {
            product.description = Some(description.clone());
        }
        if let Some(category_id) = patch.category_id {
            product.category_id = Some(category_id);
        }
        if let Some(supplier_id) = patch.supplier_id {
            product.supplier_id = Some(supplier_id);
        }
        if let Some(price) = patch.price {
            product.price = price;
        }
        if let Some(cost) = patch.cost {
            product.cost = cost;
        }
        if let Some(tax_rate) = patch.tax_rate {
            product.tax_rate = Some(tax_rate);
        }
        if let Some(barcode) = &patch.barcode {
            product.barcode = Some(barcode.clone());
        }
        if let Some(visibility) = patch.visibility {
            product.visibility = visibility;
        }
        if let Some(product_type) = patch.product_type {
            product.product_type = product_type;
        }
        Ok(())
    }

    async fn list_locations(&self, org_id: Uuid) -> Result<Vec<LocationRecord>> {
        Ok(self
            .state()
            .locations
            .iter()
            .filter(|l| l.org_id == org_id)
            .map(|l| LocationRecord {
                id: l.id,
                name: l.name.clone(),
            })
            .collect())
    }

    async fn set_stock(
        &self,
        org_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        quantity: f64,
    ) -> Result<()> {
        let mut state = self.state();
        match state.stock.iter_mut().find(|s| {
            s.org_id == org_id && s.product_id == product_id && s.location_id == location_id
        }) {
            Some(existing) => existing.quantity = quantity,
            None => state.stock.push(StoredStock {
                org_id,
                product_id,
                location_id,
                quantity,
            }),
        }
        Ok(())
    }
}
