//! Importer CLI - drives spreadsheet imports against Postgres
//!
//! Responsibilities:
//! - Parse an uploaded workbook/CSV for one entity type
//! - Reconcile the rows against the org's catalog via the Postgres store
//! - Record each run in the import_runs audit table (file hash, counts, status)
//! - Write the corrective error workbook and optional JSON report
//!
//! CRITICAL: a failed row must never abort the run. The engine isolates
//! rows; this binary only reports what happened and records the audit row.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::PathBuf;
use tokio::fs;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use importer::store::{
    CategoryRecord, LocationRecord, PartyDraft, PartyPatch, PartyRecord, ProductDraft,
    ProductPatch, ProductRecord, Store,
};
use importer::{
    generate_error_file, generate_template, parse, reconcile, EntityType, ImportResult,
    ParseResult,
};

#[derive(Parser, Debug)]
#[command(name = "importer", about = "Imports spreadsheet uploads into the catalog")]
struct Args {
    /// Spreadsheet to import (.xlsx, .xls or .csv)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Entity to import: products, stock, prices, customers or suppliers
    #[arg(long)]
    entity: String,

    /// Organization the import is scoped to (UUID)
    #[arg(long)]
    org_id: Option<String>,

    /// Dry run - parse and preview without touching the database
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Where to write the error workbook when rows fail
    #[arg(long)]
    error_file: Option<PathBuf>,

    /// Write the entity's blank template to this path and exit
    #[arg(long)]
    write_template: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long, default_value = "false")]
    json: bool,
}

/// Machine-readable run report for `--json`.
#[derive(Debug, Serialize)]
struct RunReport<'a> {
    run_id: Option<Uuid>,
    entity: EntityType,
    content_hash: &'a str,
    total_rows: usize,
    valid_rows: usize,
    error_rows: usize,
    result: Option<&'a ImportResult>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();
    let entity: EntityType = args.entity.parse()?;

    if let Some(path) = &args.write_template {
        let bytes = generate_template(entity)?;
        fs::write(path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Template written: {}", path.display());
        return Ok(());
    }

    let file = args
        .file
        .as_ref()
        .context("--file is required unless --write-template is used")?;
    let buffer = fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let content_hash = format!("{:x}", Sha256::digest(&buffer));

    println!("=== Back Office Importer ===");
    println!("File: {}", file.display());
    println!("Entity: {}", entity);
    println!("Size: {} bytes", buffer.len());
    println!("Hash: {}", content_hash);
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let parsed = parse(&buffer, entity);
    print_parse_report(&parsed);

    // rows with errors still flow through; only an unreadable file stops here
    if !parsed.success && parsed.total_rows == 0 {
        anyhow::bail!("File could not be read as a workbook or CSV");
    }

    if args.dry_run {
        if parsed.error_rows > 0 {
            if let Some(path) = &args.error_file {
                let bytes = generate_error_file(entity, &parsed.rows, &[])?;
                fs::write(path, &bytes)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("\nError file written: {}", path.display());
            }
        }
        if args.json {
            let report = RunReport {
                run_id: None,
                entity,
                content_hash: &content_hash,
                total_rows: parsed.total_rows,
                valid_rows: parsed.valid_rows,
                error_rows: parsed.error_rows,
                result: None,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        println!("\nDry run - nothing was written");
        return Ok(());
    }

    let org_id: Uuid = args
        .org_id
        .as_deref()
        .context("--org-id is required for live imports")?
        .parse()
        .context("Invalid org_id UUID")?;
    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .context("Failed to connect to database")?;
    let store = PgStore { pool: pool.clone() };

    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    let run_id = create_import_run(&pool, org_id, entity, file_name, &content_hash).await?;
    tracing::info!(run_id = %run_id, entity = %entity, "import run started");

    let outcome = reconcile(&store, org_id, entity, &parsed.rows).await;
    match &outcome {
        Ok(result) => {
            let status = if result.failed == 0 {
                "completed"
            } else {
                "completed_with_errors"
            };
            finish_import_run(&pool, run_id, status, None, result).await?;
        }
        Err(e) => {
            let empty = ImportResult::default();
            finish_import_run(&pool, run_id, "failed", Some(&e.to_string()), &empty).await?;
        }
    }
    let result = outcome?;

    println!("\n=== Reconciliation ===");
    println!("Created: {}", result.created);
    println!("Updated: {}", result.updated);
    println!("Failed: {}", result.failed);
    for error in result.errors.iter().take(5) {
        println!("  [row {}] {}", error.row_number, error.error);
    }
    if result.errors.len() > 5 {
        println!("  ... and {} more", result.errors.len() - 5);
    }

    if result.failed > 0 {
        if let Some(path) = &args.error_file {
            let bytes = generate_error_file(entity, &parsed.rows, &result.errors)?;
            fs::write(path, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("\nError file written: {}", path.display());
        }
    }

    if args.json {
        let report = RunReport {
            run_id: Some(run_id),
            entity,
            content_hash: &content_hash,
            total_rows: parsed.total_rows,
            valid_rows: parsed.valid_rows,
            error_rows: parsed.error_rows,
            result: Some(&result),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    tracing::info!(run_id = %run_id, "import run finished");
    println!("\n=== Import Complete ===");
    println!("{}", result.summary());

    Ok(())
}

fn print_parse_report(parsed: &ParseResult) {
    println!("\n=== Parse Result ===");
    println!(
        "Rows: {} total, {} valid, {} with errors",
        parsed.total_rows, parsed.valid_rows, parsed.error_rows
    );
    let broken: Vec<_> = parsed.rows.iter().filter(|r| !r.is_valid()).collect();
    for row in broken.iter().take(5) {
        println!("  [row {}] {}", row.row_number, row.errors.join("; "));
    }
    if broken.len() > 5 {
        println!("  ... and {} more", broken.len() - 5);
    }
}

// =============================================================================
// IMPORT RUN AUDIT
// =============================================================================

/// Record the run before reconciliation starts.
async fn create_import_run(
    pool: &PgPool,
    org_id: Uuid,
    entity: EntityType,
    file_name: &str,
    content_hash: &str,
) -> Result<Uuid> {
    let run_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO import_runs (run_id, org_id, entity_type, file_name, content_hash, status, started_at)
        VALUES ($1, $2, $3, $4, $5, 'running', $6)
        "#,
    )
    .bind(run_id)
    .bind(org_id)
    .bind(entity.tag())
    .bind(file_name)
    .bind(content_hash)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(run_id)
}

/// Close the run with final counts and status.
async fn finish_import_run(
    pool: &PgPool,
    run_id: Uuid,
    status: &str,
    error: Option<&str>,
    result: &ImportResult,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE import_runs
        SET finished_at = $2, status = $3, error = $4,
            created_count = $5, updated_count = $6, failed_count = $7
        WHERE run_id = $1
        "#,
    )
    .bind(run_id)
    .bind(Utc::now())
    .bind(status)
    .bind(error)
    .bind(result.created as i64)
    .bind(result.updated as i64)
    .bind(result.failed as i64)
    .execute(pool)
    .await?;
    Ok(())
}

// =============================================================================
// POSTGRES STORE
// =============================================================================

/// Postgres-backed store. Every query filters by org; name lookups are
/// case-insensitive via lower(); updates COALESCE so a missing patch field
/// keeps the stored value.
struct PgStore {
    pool: PgPool,
}

#[async_trait]
impl Store for PgStore {
    async fn list_categories(&self, org_id: Uuid) -> Result<Vec<CategoryRecord>> {
        let rows: Vec<(Uuid, String, Option<Uuid>)> = sqlx::query_as(
            "SELECT category_id, name, parent_id FROM categories WHERE org_id = $1",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, parent_id)| CategoryRecord {
                id,
                name,
                parent_id,
            })
            .collect())
    }

    async fn create_category(
        &self,
        org_id: Uuid,
        name: &str,
        parent_id: Option<Uuid>,
    ) -> Result<CategoryRecord> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO categories (category_id, org_id, name, parent_id) VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(org_id)
        .bind(name)
        .bind(parent_id)
        .execute(&self.pool)
        .await?;
        Ok(CategoryRecord {
            id,
            name: name.to_string(),
            parent_id,
        })
    }

    async fn list_suppliers(&self, org_id: Uuid) -> Result<Vec<PartyRecord>> {
        let rows: Vec<(Uuid, String, Option<String>)> =
            sqlx::query_as("SELECT supplier_id, name, tax_id FROM suppliers WHERE org_id = $1")
                .bind(org_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, tax_id)| PartyRecord { id, name, tax_id })
            .collect())
    }

    async fn find_supplier_by_tax_id(
        &self,
        org_id: Uuid,
        tax_id: &str,
    ) -> Result<Option<PartyRecord>> {
        let row: Option<(Uuid, String, Option<String>)> = sqlx::query_as(
            "SELECT supplier_id, name, tax_id FROM suppliers WHERE org_id = $1 AND tax_id = $2",
        )
        .bind(org_id)
        .bind(tax_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, tax_id)| PartyRecord { id, name, tax_id }))
    }

    async fn find_supplier_by_name(&self, org_id: Uuid, name: &str) -> Result<Option<PartyRecord>> {
        let row: Option<(Uuid, String, Option<String>)> = sqlx::query_as(
            "SELECT supplier_id, name, tax_id FROM suppliers WHERE org_id = $1 AND lower(name) = lower($2)",
        )
        .bind(org_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, tax_id)| PartyRecord { id, name, tax_id }))
    }

    async fn create_supplier(&self, org_id: Uuid, draft: &PartyDraft) -> Result<PartyRecord> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO suppliers (supplier_id, org_id, name, tax_id, email, phone, address)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(org_id)
        .bind(&draft.name)
        .bind(draft.tax_id.as_deref())
        .bind(draft.email.as_deref())
        .bind(draft.phone.as_deref())
        .bind(draft.address.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(PartyRecord {
            id,
            name: draft.name.clone(),
            tax_id: draft.tax_id.clone(),
        })
    }

    async fn update_supplier(&self, org_id: Uuid, id: Uuid, patch: &PartyPatch) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE suppliers
            SET name = COALESCE($3, name),
                tax_id = COALESCE($4, tax_id),
                email = COALESCE($5, email),
                phone = COALESCE($6, phone),
                address = COALESCE($7, address)
            WHERE org_id = $1 AND supplier_id = $2
            "#,
        )
        .bind(org_id)
        .bind(id)
        .bind(patch.name.as_deref())
        .bind(patch.tax_id.as_deref())
        .bind(patch.email.as_deref())
        .bind(patch.phone.as_deref())
        .bind(patch.address.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_customer_by_tax_id(
        &self,
        org_id: Uuid,
        tax_id: &str,
    ) -> Result<Option<PartyRecord>> {
        let row: Option<(Uuid, String, Option<String>)> = sqlx::query_as(
            "SELECT customer_id, name, tax_id FROM customers WHERE org_id = $1 AND tax_id = $2",
        )
        .bind(org_id)
        .bind(tax_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, tax_id)| PartyRecord { id, name, tax_id }))
    }

    async fn find_customer_by_name(&self, org_id: Uuid, name: &str) -> Result<Option<PartyRecord>> {
        let row: Option<(Uuid, String, Option<String>)> = sqlx::query_as(
            "SELECT customer_id, name, tax_id FROM customers WHERE org_id = $1 AND lower(name) = lower($2)",
        )
        .bind(org_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, tax_id)| PartyRecord { id, name, tax_id }))
    }

    async fn create_customer(&self, org_id: Uuid, draft: &PartyDraft) -> Result<PartyRecord> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO customers (customer_id, org_id, name, tax_id, email, phone, address)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(org_id)
        .bind(&draft.name)
        .bind(draft.tax_id.as_deref())
        .bind(draft.email.as_deref())
        .bind(draft.phone.as_deref())
        .bind(draft.address.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(PartyRecord {
            id,
            name: draft.name.clone(),
            tax_id: draft.tax_id.clone(),
        })
    }

    async fn update_customer(&self, org_id: Uuid, id: Uuid, patch: &PartyPatch) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE customers
            SET name = COALESCE($3, name),
                tax_id = COALESCE($4, tax_id),
                email = COALESCE($5, email),
                phone = COALESCE($6, phone),
                address = COALESCE($7, address)
            WHERE org_id = $1 AND customer_id = $2
            "#,
        )
        .bind(org_id)
        .bind(id)
        .bind(patch.name.as_deref())
        .bind(patch.tax_id.as_deref())
        .bind(patch.email.as_deref())
        .bind(patch.phone.as_deref())
        .bind(patch.address.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_product_by_sku(&self, org_id: Uuid, sku: &str) -> Result<Option<ProductRecord>> {
        let row: Option<(Uuid, String, String)> = sqlx::query_as(
            "SELECT product_id, sku, name FROM products WHERE org_id = $1 AND sku = $2",
        )
        .bind(org_id)
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, sku, name)| ProductRecord { id, sku, name }))
    }

    async fn create_product(&self, org_id: Uuid, draft: &ProductDraft) -> Result<ProductRecord> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO products
                (product_id, org_id, sku, name, description, category_id, supplier_id,
                 price, cost, tax_rate, barcode, visibility, product_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(id)
        .bind(org_id)
        .bind(&draft.sku)
        .bind(&draft.name)
        .bind(draft.description.as_deref())
        .bind(draft.category_id)
        .bind(draft.supplier_id)
        .bind(draft.price)
        .bind(draft.cost)
        .bind(draft.tax_rate)
        .bind(draft.barcode.as_deref())
        .bind(draft.visibility.as_str())
        .bind(draft.product_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(ProductRecord {
            id,
            sku: draft.sku.clone(),
            name: draft.name.clone(),
        })
    }

    async fn update_product(&self, org_id: Uuid, id: Uuid, patch: &ProductPatch) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE products
            SET name = COALESCE($3, name),
                description = COALESCE($4, description),
                category_id = COALESCE($5, category_id),
                supplier_id = COALESCE($6, supplier_id),
                price = COALESCE($7, price),
                cost = COALESCE($8, cost),
                tax_rate = COALESCE($9, tax_rate),
                barcode = COALESCE($10, barcode),
                visibility = COALESCE($11, visibility),
                product_type = COALESCE($12, product_type)
            WHERE org_id = $1 AND product_id = $2
            "#,
        )
        .bind(org_id)
        .bind(id)
        .bind(patch.name.as_deref())
        .bind(patch.description.as_deref())
        .bind(patch.category_id)
        .bind(patch.supplier_id)
        .bind(patch.price)
        .bind(patch.cost)
        .bind(patch.tax_rate)
        .bind(patch.barcode.as_deref())
        .bind(patch.visibility.map(|v| v.as_str()))
        .bind(patch.product_type.map(|t| t.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_locations(&self, org_id: Uuid) -> Result<Vec<LocationRecord>> {
        let rows: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT location_id, name FROM locations WHERE org_id = $1 ORDER BY created_at",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name)| LocationRecord { id, name })
            .collect())
    }

    async fn set_stock(
        &self,
        org_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        quantity: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_levels (org_id, product_id, location_id, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (product_id, location_id)
            DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(org_id)
        .bind(product_id)
        .bind(location_id)
        .bind(quantity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
