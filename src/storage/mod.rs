//! Persistence layer — the catalog store.
//!
//! SQLite via sqlx. Pure CRUD plus filtered queries; no business logic.
//! Every job opens its own logical unit of work and commits per product,
//! so a partial failure leaves already-committed items consistent.
//! Multi-step creations (product + metrics, A/B test + variant listings)
//! run inside a single transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use tracing::{debug, info};

use crate::types::{
    AbTest, ActionEntry, ActionRecord, CompetitionLevel, CompetitorSnapshot, Listing,
    ListingStatus, NewProduct, Product, ProductMetrics, ProductStatus, TestStatus, TestType,
    Variant, VariantMetrics, Winner,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sku TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    base_cost REAL NOT NULL,
    shipping_cost REAL NOT NULL DEFAULT 0,
    stock INTEGER NOT NULL DEFAULT 0,
    category TEXT,
    marketplace_category_id TEXT,
    storefront_product_id TEXT,
    marketplace_item_id TEXT UNIQUE,
    marketplace_permalink TEXT,
    calculated_price REAL,
    final_price REAL,
    margin_percentage REAL,
    commission_percentage REAL,
    status TEXT NOT NULL DEFAULT 'pending',
    score INTEGER NOT NULL DEFAULT 0,
    auto_approved INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    published_at TEXT
);

CREATE TABLE IF NOT EXISTS product_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL UNIQUE REFERENCES products(id) ON DELETE CASCADE,
    total_visits INTEGER NOT NULL DEFAULT 0,
    total_sales INTEGER NOT NULL DEFAULT 0,
    total_revenue REAL NOT NULL DEFAULT 0,
    total_profit REAL NOT NULL DEFAULT 0,
    ctr REAL NOT NULL DEFAULT 0,
    conversion_rate REAL NOT NULL DEFAULT 0,
    last_sale_date TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS listings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
    marketplace_item_id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    description TEXT,
    price REAL NOT NULL,
    is_ab_test INTEGER NOT NULL DEFAULT 0,
    ab_variant TEXT,
    ab_test_id INTEGER,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    ended_at TEXT
);

CREATE TABLE IF NOT EXISTS listing_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    listing_id INTEGER NOT NULL REFERENCES listings(id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    visits INTEGER NOT NULL DEFAULT 0,
    sales INTEGER NOT NULL DEFAULT 0,
    revenue REAL NOT NULL DEFAULT 0,
    ad_spend REAL NOT NULL DEFAULT 0,
    ad_impressions INTEGER NOT NULL DEFAULT 0,
    ad_clicks INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS ab_tests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
    test_type TEXT NOT NULL,
    variant_a_id INTEGER NOT NULL REFERENCES listings(id),
    variant_b_id INTEGER NOT NULL REFERENCES listings(id),
    status TEXT NOT NULL DEFAULT 'running',
    winner TEXT,
    results TEXT,
    started_at TEXT NOT NULL,
    ended_at TEXT
);

CREATE TABLE IF NOT EXISTS competitor_analyses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL REFERENCES products(id) ON DELETE CASCADE,
    keyword TEXT NOT NULL,
    avg_price REAL NOT NULL,
    min_price REAL NOT NULL,
    max_price REAL NOT NULL,
    competition_level TEXT NOT NULL,
    top_competitors TEXT NOT NULL,
    free_shipping_percentage REAL NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS action_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER REFERENCES products(id) ON DELETE CASCADE,
    action_type TEXT NOT NULL,
    reason TEXT,
    old_value TEXT,
    new_value TEXT,
    success INTEGER NOT NULL DEFAULT 1,
    error_message TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_products_status ON products(status);
CREATE INDEX IF NOT EXISTS idx_listings_product ON listings(product_id);
CREATE INDEX IF NOT EXISTS idx_listing_metrics_listing ON listing_metrics(listing_id);
CREATE INDEX IF NOT EXISTS idx_analyses_product ON competitor_analyses(product_id);
CREATE INDEX IF NOT EXISTS idx_actions_created ON action_log(created_at);
"#;

// ---------------------------------------------------------------------------
// Row types (sqlite → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct ProductRow {
    id: i64,
    sku: String,
    name: String,
    base_cost: f64,
    shipping_cost: f64,
    stock: i64,
    category: Option<String>,
    marketplace_category_id: Option<String>,
    storefront_product_id: Option<String>,
    marketplace_item_id: Option<String>,
    marketplace_permalink: Option<String>,
    calculated_price: Option<f64>,
    final_price: Option<f64>,
    margin_percentage: Option<f64>,
    commission_percentage: Option<f64>,
    status: String,
    score: i64,
    auto_approved: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
}

impl TryFrom<ProductRow> for Product {
    type Error = anyhow::Error;

    fn try_from(row: ProductRow) -> Result<Self> {
        Ok(Product {
            id: row.id,
            sku: row.sku,
            name: row.name,
            base_cost: row.base_cost,
            shipping_cost: row.shipping_cost,
            stock: row.stock,
            category: row.category,
            marketplace_category_id: row.marketplace_category_id,
            storefront_product_id: row.storefront_product_id,
            marketplace_item_id: row.marketplace_item_id,
            marketplace_permalink: row.marketplace_permalink,
            calculated_price: row.calculated_price,
            final_price: row.final_price,
            margin_percentage: row.margin_percentage,
            commission_percentage: row.commission_percentage,
            status: ProductStatus::from_str(&row.status)?,
            score: row.score,
            auto_approved: row.auto_approved,
            created_at: row.created_at,
            updated_at: row.updated_at,
            published_at: row.published_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MetricsRow {
    product_id: i64,
    total_visits: i64,
    total_sales: i64,
    total_revenue: f64,
    total_profit: f64,
    ctr: f64,
    conversion_rate: f64,
    last_sale_date: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<MetricsRow> for ProductMetrics {
    fn from(row: MetricsRow) -> Self {
        ProductMetrics {
            product_id: row.product_id,
            total_visits: row.total_visits,
            total_sales: row.total_sales,
            total_revenue: row.total_revenue,
            total_profit: row.total_profit,
            ctr: row.ctr,
            conversion_rate: row.conversion_rate,
            last_sale_date: row.last_sale_date,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ListingRow {
    id: i64,
    product_id: i64,
    marketplace_item_id: String,
    title: String,
    description: Option<String>,
    price: f64,
    is_ab_test: bool,
    ab_variant: Option<String>,
    ab_test_id: Option<i64>,
    status: String,
    created_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl TryFrom<ListingRow> for Listing {
    type Error = anyhow::Error;

    fn try_from(row: ListingRow) -> Result<Self> {
        Ok(Listing {
            id: row.id,
            product_id: row.product_id,
            marketplace_item_id: row.marketplace_item_id,
            title: row.title,
            description: row.description,
            price: row.price,
            is_ab_test: row.is_ab_test,
            ab_variant: row.ab_variant.as_deref().map(Variant::from_str).transpose()?,
            ab_test_id: row.ab_test_id,
            status: ListingStatus::from_str(&row.status)?,
            created_at: row.created_at,
            ended_at: row.ended_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AbTestRow {
    id: i64,
    product_id: i64,
    test_type: String,
    variant_a_id: i64,
    variant_b_id: i64,
    status: String,
    winner: Option<String>,
    results: Option<String>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl TryFrom<AbTestRow> for AbTest {
    type Error = anyhow::Error;

    fn try_from(row: AbTestRow) -> Result<Self> {
        Ok(AbTest {
            id: row.id,
            product_id: row.product_id,
            test_type: TestType::from_str(&row.test_type)?,
            variant_a_id: row.variant_a_id,
            variant_b_id: row.variant_b_id,
            status: TestStatus::from_str(&row.status)?,
            winner: row.winner.as_deref().map(Winner::from_str).transpose()?,
            results: row
                .results
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("Corrupt A/B test results JSON")?,
            started_at: row.started_at,
            ended_at: row.ended_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AnalysisRow {
    id: i64,
    product_id: i64,
    keyword: String,
    avg_price: f64,
    min_price: f64,
    max_price: f64,
    competition_level: String,
    top_competitors: String,
    free_shipping_percentage: f64,
    created_at: DateTime<Utc>,
}

impl TryFrom<AnalysisRow> for CompetitorSnapshot {
    type Error = anyhow::Error;

    fn try_from(row: AnalysisRow) -> Result<Self> {
        Ok(CompetitorSnapshot {
            id: row.id,
            product_id: row.product_id,
            keyword: row.keyword,
            avg_price: row.avg_price,
            min_price: row.min_price,
            max_price: row.max_price,
            competition_level: CompetitionLevel::from_str(&row.competition_level)?,
            top_competitors: serde_json::from_str(&row.top_competitors)
                .context("Corrupt top_competitors JSON")?,
            free_shipping_percentage: row.free_shipping_percentage,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ActionRow {
    id: i64,
    product_id: Option<i64>,
    action_type: String,
    reason: Option<String>,
    old_value: Option<String>,
    new_value: Option<String>,
    success: bool,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ActionRow> for ActionRecord {
    fn from(row: ActionRow) -> Self {
        ActionRecord {
            id: row.id,
            product_id: row.product_id,
            action_type: row.action_type,
            reason: row.reason,
            old_value: row.old_value,
            new_value: row.new_value,
            success: row.success,
            error_message: row.error_message,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct WindowRow {
    sales: Option<i64>,
    revenue: Option<f64>,
    ad_spend: Option<f64>,
}

/// Totals of the append-only listing metrics over a window.
#[derive(Debug, Clone, Default)]
pub struct WindowTotals {
    pub sales: i64,
    pub revenue: f64,
    pub ad_spend: f64,
}

/// Per-product rollup of the listing metrics series.
#[derive(Debug, FromRow)]
pub struct RollupRow {
    pub product_id: i64,
    pub visits: i64,
    pub sales: i64,
    pub revenue: f64,
    pub ad_impressions: i64,
    pub ad_clicks: i64,
    pub last_sale_date: Option<DateTime<Utc>>,
}

/// Variant listing payload for A/B test creation.
#[derive(Debug, Clone)]
pub struct VariantDraft {
    pub marketplace_item_id: String,
    pub title: String,
    pub description: Option<String>,
    pub price: f64,
}

const PRODUCT_COLUMNS: &str = "id, sku, name, base_cost, shipping_cost, stock, category, \
     marketplace_category_id, storefront_product_id, marketplace_item_id, marketplace_permalink, \
     calculated_price, final_price, margin_percentage, commission_percentage, status, score, \
     auto_approved, created_at, updated_at, published_at";

const LISTING_COLUMNS: &str = "id, product_id, marketplace_item_id, title, description, price, \
     is_ab_test, ab_variant, ab_test_id, status, created_at, ended_at";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to the catalog database. Cheap to clone (shares the pool).
#[derive(Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    /// Open (creating if missing) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database url: {url}"))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to open catalog database")?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(url, "Catalog store ready");
        Ok(store)
    }

    /// In-memory store for tests. Single connection so state is shared.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory catalog database")?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("Failed to create catalog schema")?;
        Ok(())
    }

    // -- Products --------------------------------------------------------

    /// Create a product and its empty metrics row in one transaction.
    pub async fn create_product(&self, new: &NewProduct) -> Result<Product> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO products (sku, name, base_cost, shipping_cost, stock, category, \
             marketplace_category_id, storefront_product_id, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(&new.sku)
        .bind(&new.name)
        .bind(new.base_cost)
        .bind(new.shipping_cost)
        .bind(new.stock)
        .bind(&new.category)
        .bind(&new.marketplace_category_id)
        .bind(&new.storefront_product_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert product")?;

        let product_id = result.last_insert_rowid();

        sqlx::query("INSERT INTO product_metrics (product_id, updated_at) VALUES (?, ?)")
            .bind(product_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to insert product metrics")?;

        tx.commit().await?;
        debug!(sku = %new.sku, product_id, "Product created");

        self.product(product_id)
            .await?
            .context("Product vanished after insert")
    }

    pub async fn product(&self, id: i64) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Product::try_from).transpose()
    }

    pub async fn product_by_sku(&self, sku: &str) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = ?"
        ))
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Product::try_from).transpose()
    }

    pub async fn all_products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Product::try_from).collect()
    }

    /// Products in a given status, in stable id order.
    pub async fn products_by_status(&self, status: ProductStatus) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE status = ? ORDER BY id"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Product::try_from).collect()
    }

    /// Approved, auto-approved products not yet published.
    pub async fn auto_publishable_products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE status = 'approved' AND auto_approved = 1 AND marketplace_item_id IS NULL \
             ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Product::try_from).collect()
    }

    /// Published products backed by a storefront product (stock sync targets).
    pub async fn storefront_linked_published(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE status = 'published' AND storefront_product_id IS NOT NULL ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Product::try_from).collect()
    }

    /// Persist the result of a pricing + scoring pass and the gated status.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_evaluation(
        &self,
        id: i64,
        calculated_price: f64,
        final_price: f64,
        margin_percentage: f64,
        commission_percentage: f64,
        score: i64,
        status: ProductStatus,
        auto_approved: bool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE products SET calculated_price = ?, final_price = ?, margin_percentage = ?, \
             commission_percentage = ?, score = ?, status = ?, auto_approved = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(calculated_price)
        .bind(final_price)
        .bind(margin_percentage)
        .bind(commission_percentage)
        .bind(score)
        .bind(status.as_str())
        .bind(auto_approved)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to persist evaluation")?;
        Ok(())
    }

    pub async fn mark_published(
        &self,
        id: i64,
        marketplace_item_id: &str,
        permalink: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE products SET marketplace_item_id = ?, marketplace_permalink = ?, \
             status = 'published', published_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(marketplace_item_id)
        .bind(permalink)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark product published")?;
        Ok(())
    }

    pub async fn update_product_status(&self, id: i64, status: ProductStatus) -> Result<()> {
        sqlx::query("UPDATE products SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update product status")?;
        Ok(())
    }

    pub async fn update_product_price(&self, id: i64, price: f64, margin: f64) -> Result<()> {
        sqlx::query(
            "UPDATE products SET final_price = ?, margin_percentage = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(price)
        .bind(margin)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to update product price")?;
        Ok(())
    }

    pub async fn update_product_stock(&self, id: i64, stock: i64) -> Result<()> {
        sqlx::query("UPDATE products SET stock = ?, updated_at = ? WHERE id = ?")
            .bind(stock)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update product stock")?;
        Ok(())
    }

    /// Hard delete. Cascades to metrics, listings, analyses and actions.
    pub async fn delete_product(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete product")?;
        Ok(())
    }

    // -- Product metrics -------------------------------------------------

    pub async fn metrics(&self, product_id: i64) -> Result<Option<ProductMetrics>> {
        let row = sqlx::query_as::<_, MetricsRow>(
            "SELECT product_id, total_visits, total_sales, total_revenue, total_profit, ctr, \
             conversion_rate, last_sale_date, updated_at FROM product_metrics WHERE product_id = ?",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ProductMetrics::from))
    }

    /// Overwrite the cumulative counters (metric ingestion / rollup).
    pub async fn set_metrics(&self, m: &ProductMetrics) -> Result<()> {
        sqlx::query(
            "UPDATE product_metrics SET total_visits = ?, total_sales = ?, total_revenue = ?, \
             total_profit = ?, ctr = ?, conversion_rate = ?, last_sale_date = ?, updated_at = ? \
             WHERE product_id = ?",
        )
        .bind(m.total_visits)
        .bind(m.total_sales)
        .bind(m.total_revenue)
        .bind(m.total_profit)
        .bind(m.ctr)
        .bind(m.conversion_rate)
        .bind(m.last_sale_date)
        .bind(Utc::now())
        .bind(m.product_id)
        .execute(&self.pool)
        .await
        .context("Failed to update product metrics")?;
        Ok(())
    }

    // -- Listings --------------------------------------------------------

    /// Create the live (non-A/B) listing for a freshly published product.
    pub async fn create_live_listing(
        &self,
        product_id: i64,
        marketplace_item_id: &str,
        title: &str,
        price: f64,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO listings (product_id, marketplace_item_id, title, price, is_ab_test, \
             status, created_at) VALUES (?, ?, ?, ?, 0, 'active', ?)",
        )
        .bind(product_id)
        .bind(marketplace_item_id)
        .bind(title)
        .bind(price)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to insert listing")?;
        Ok(result.last_insert_rowid())
    }

    pub async fn listing(&self, id: i64) -> Result<Option<Listing>> {
        let row = sqlx::query_as::<_, ListingRow>(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Listing::try_from).transpose()
    }

    pub async fn listings_for_product(&self, product_id: i64) -> Result<Vec<Listing>> {
        let rows = sqlx::query_as::<_, ListingRow>(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE product_id = ? ORDER BY id"
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Listing::try_from).collect()
    }

    pub async fn update_listing_status(
        &self,
        id: i64,
        status: ListingStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query("UPDATE listings SET status = ?, ended_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(ended_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update listing status")?;
        Ok(())
    }

    // -- Listing metrics (append-only series) ----------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn add_listing_metrics(
        &self,
        listing_id: i64,
        date: DateTime<Utc>,
        visits: i64,
        sales: i64,
        revenue: f64,
        ad_spend: f64,
        ad_impressions: i64,
        ad_clicks: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO listing_metrics (listing_id, date, visits, sales, revenue, ad_spend, \
             ad_impressions, ad_clicks) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(listing_id)
        .bind(date)
        .bind(visits)
        .bind(sales)
        .bind(revenue)
        .bind(ad_spend)
        .bind(ad_impressions)
        .bind(ad_clicks)
        .execute(&self.pool)
        .await
        .context("Failed to append listing metrics")?;
        Ok(())
    }

    /// Aggregate a listing's series, optionally restricted to `since..`.
    pub async fn aggregate_listing_metrics(
        &self,
        listing_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<VariantMetrics> {
        #[derive(FromRow)]
        struct Totals {
            visits: Option<i64>,
            sales: Option<i64>,
            revenue: Option<f64>,
        }

        let totals: Totals = match since {
            Some(cutoff) => {
                sqlx::query_as(
                    "SELECT SUM(visits) AS visits, SUM(sales) AS sales, SUM(revenue) AS revenue \
                     FROM listing_metrics WHERE listing_id = ? AND date >= ?",
                )
                .bind(listing_id)
                .bind(cutoff)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT SUM(visits) AS visits, SUM(sales) AS sales, SUM(revenue) AS revenue \
                     FROM listing_metrics WHERE listing_id = ?",
                )
                .bind(listing_id)
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(VariantMetrics::new(
            totals.visits.unwrap_or(0),
            totals.sales.unwrap_or(0),
            totals.revenue.unwrap_or(0.0),
        ))
    }

    /// Sales / revenue / ad spend across all of a product's listings since
    /// the cutoff. Feeds the optimizer's 7-day predicates.
    pub async fn product_window(
        &self,
        product_id: i64,
        since: DateTime<Utc>,
    ) -> Result<WindowTotals> {
        let row: WindowRow = sqlx::query_as(
            "SELECT SUM(lm.sales) AS sales, SUM(lm.revenue) AS revenue, \
             SUM(lm.ad_spend) AS ad_spend \
             FROM listing_metrics lm JOIN listings l ON l.id = lm.listing_id \
             WHERE l.product_id = ? AND lm.date >= ?",
        )
        .bind(product_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(WindowTotals {
            sales: row.sales.unwrap_or(0),
            revenue: row.revenue.unwrap_or(0.0),
            ad_spend: row.ad_spend.unwrap_or(0.0),
        })
    }

    /// Per-product totals of the whole listing-metrics series, for the
    /// rollup job.
    pub async fn listing_metric_rollups(&self) -> Result<Vec<RollupRow>> {
        let rows = sqlx::query_as::<_, RollupRow>(
            "SELECT l.product_id AS product_id, \
             COALESCE(SUM(lm.visits), 0) AS visits, \
             COALESCE(SUM(lm.sales), 0) AS sales, \
             COALESCE(SUM(lm.revenue), 0) AS revenue, \
             COALESCE(SUM(lm.ad_impressions), 0) AS ad_impressions, \
             COALESCE(SUM(lm.ad_clicks), 0) AS ad_clicks, \
             MAX(CASE WHEN lm.sales > 0 THEN lm.date END) AS last_sale_date \
             FROM listing_metrics lm JOIN listings l ON l.id = lm.listing_id \
             GROUP BY l.product_id ORDER BY l.product_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- A/B tests -------------------------------------------------------

    /// Create a test with its two fresh variant listings atomically.
    /// On any failure nothing partial persists.
    pub async fn create_ab_test(
        &self,
        product_id: i64,
        test_type: TestType,
        variant_a: &VariantDraft,
        variant_b: &VariantDraft,
    ) -> Result<AbTest> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let insert_variant = |draft: &VariantDraft, variant: Variant| {
            sqlx::query(
                "INSERT INTO listings (product_id, marketplace_item_id, title, description, \
                 price, is_ab_test, ab_variant, status, created_at) \
                 VALUES (?, ?, ?, ?, ?, 1, ?, 'active', ?)",
            )
            .bind(product_id)
            .bind(draft.marketplace_item_id.clone())
            .bind(draft.title.clone())
            .bind(draft.description.clone())
            .bind(draft.price)
            .bind(variant.as_str())
            .bind(now)
        };

        let a_id = insert_variant(variant_a, Variant::A)
            .execute(&mut *tx)
            .await
            .context("Failed to insert variant A listing")?
            .last_insert_rowid();

        let b_id = insert_variant(variant_b, Variant::B)
            .execute(&mut *tx)
            .await
            .context("Failed to insert variant B listing")?
            .last_insert_rowid();

        let test_id = sqlx::query(
            "INSERT INTO ab_tests (product_id, test_type, variant_a_id, variant_b_id, status, \
             started_at) VALUES (?, ?, ?, ?, 'running', ?)",
        )
        .bind(product_id)
        .bind(test_type.as_str())
        .bind(a_id)
        .bind(b_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert A/B test")?
        .last_insert_rowid();

        sqlx::query("UPDATE listings SET ab_test_id = ? WHERE id IN (?, ?)")
            .bind(test_id)
            .bind(a_id)
            .bind(b_id)
            .execute(&mut *tx)
            .await
            .context("Failed to link variant listings")?;

        tx.commit().await?;
        info!(test_id, product_id, test_type = %test_type, "A/B test created");

        self.ab_test(test_id)
            .await?
            .context("A/B test vanished after insert")
    }

    pub async fn ab_test(&self, id: i64) -> Result<Option<AbTest>> {
        let row = sqlx::query_as::<_, AbTestRow>(
            "SELECT id, product_id, test_type, variant_a_id, variant_b_id, status, winner, \
             results, started_at, ended_at FROM ab_tests WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AbTest::try_from).transpose()
    }

    pub async fn running_tests(&self) -> Result<Vec<AbTest>> {
        let rows = sqlx::query_as::<_, AbTestRow>(
            "SELECT id, product_id, test_type, variant_a_id, variant_b_id, status, winner, \
             results, started_at, ended_at FROM ab_tests WHERE status = 'running' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AbTest::try_from).collect()
    }

    /// Complete a test: winner, results snapshot, end timestamp, and the
    /// losing listing paused, all in one transaction.
    pub async fn complete_ab_test(
        &self,
        test_id: i64,
        winner: Winner,
        results: &serde_json::Value,
        loser_listing_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE ab_tests SET status = 'completed', winner = ?, results = ?, ended_at = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(winner.as_str())
        .bind(results.to_string())
        .bind(now)
        .bind(test_id)
        .execute(&mut *tx)
        .await
        .context("Failed to complete A/B test")?;

        if let Some(listing_id) = loser_listing_id {
            sqlx::query("UPDATE listings SET status = 'paused', ended_at = ? WHERE id = ?")
                .bind(now)
                .bind(listing_id)
                .execute(&mut *tx)
                .await
                .context("Failed to pause losing variant")?;
        }

        tx.commit().await?;
        Ok(())
    }

    // -- Competitor analyses ---------------------------------------------

    pub async fn insert_analysis(
        &self,
        product_id: i64,
        keyword: &str,
        avg_price: f64,
        min_price: f64,
        max_price: f64,
        level: CompetitionLevel,
        top_competitors: &serde_json::Value,
        free_shipping_percentage: f64,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO competitor_analyses (product_id, keyword, avg_price, min_price, \
             max_price, competition_level, top_competitors, free_shipping_percentage, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(product_id)
        .bind(keyword)
        .bind(avg_price)
        .bind(min_price)
        .bind(max_price)
        .bind(level.as_str())
        .bind(top_competitors.to_string())
        .bind(free_shipping_percentage)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to insert competitor analysis")?;
        Ok(result.last_insert_rowid())
    }

    /// The authoritative (most recent) analysis for a product.
    pub async fn latest_analysis(&self, product_id: i64) -> Result<Option<CompetitorSnapshot>> {
        let row = sqlx::query_as::<_, AnalysisRow>(
            "SELECT id, product_id, keyword, avg_price, min_price, max_price, competition_level, \
             top_competitors, free_shipping_percentage, created_at FROM competitor_analyses \
             WHERE product_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CompetitorSnapshot::try_from).transpose()
    }

    // -- Action log ------------------------------------------------------

    /// Append to the audit trail. Never mutated or deleted afterwards.
    pub async fn log_action(&self, entry: &ActionEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO action_log (product_id, action_type, reason, old_value, new_value, \
             success, error_message, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.product_id)
        .bind(&entry.action_type)
        .bind(&entry.reason)
        .bind(&entry.old_value)
        .bind(&entry.new_value)
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to append action log")?;
        Ok(())
    }

    pub async fn recent_actions(&self, limit: i64) -> Result<Vec<ActionRecord>> {
        let rows = sqlx::query_as::<_, ActionRow>(
            "SELECT id, product_id, action_type, reason, old_value, new_value, success, \
             error_message, created_at FROM action_log ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ActionRecord::from).collect())
    }

    pub async fn actions_for_product(&self, product_id: i64) -> Result<Vec<ActionRecord>> {
        let rows = sqlx::query_as::<_, ActionRow>(
            "SELECT id, product_id, action_type, reason, old_value, new_value, success, \
             error_message, created_at FROM action_log WHERE product_id = ? ORDER BY id",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ActionRecord::from).collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_intake(sku: &str) -> NewProduct {
        NewProduct {
            sku: sku.to_string(),
            name: "Cable USB-C 2m".to_string(),
            base_cost: 100.0,
            shipping_cost: 0.0,
            stock: 25,
            category: Some("electronics".to_string()),
            marketplace_category_id: None,
            storefront_product_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_product_with_metrics() {
        let store = CatalogStore::in_memory().await.unwrap();
        let product = store.create_product(&sample_intake("SKU-1")).await.unwrap();

        assert_eq!(product.sku, "SKU-1");
        assert_eq!(product.status, ProductStatus::Pending);

        let metrics = store.metrics(product.id).await.unwrap().unwrap();
        assert_eq!(metrics.total_visits, 0);
        assert!(metrics.last_sale_date.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_sku_rejected() {
        let store = CatalogStore::in_memory().await.unwrap();
        store.create_product(&sample_intake("SKU-1")).await.unwrap();
        assert!(store.create_product(&sample_intake("SKU-1")).await.is_err());
    }

    #[tokio::test]
    async fn test_status_filters() {
        let store = CatalogStore::in_memory().await.unwrap();
        let a = store.create_product(&sample_intake("A")).await.unwrap();
        let b = store.create_product(&sample_intake("B")).await.unwrap();

        store
            .apply_evaluation(a.id, 252.17, 229.66, 35.49, 13.0, 85, ProductStatus::Approved, true)
            .await
            .unwrap();

        let approved = store
            .products_by_status(ProductStatus::Approved)
            .await
            .unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].id, a.id);

        let pending = store
            .products_by_status(ProductStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);

        let publishable = store.auto_publishable_products().await.unwrap();
        assert_eq!(publishable.len(), 1);
        assert_eq!(publishable[0].id, a.id);
    }

    #[tokio::test]
    async fn test_mark_published_sets_item_and_timestamp() {
        let store = CatalogStore::in_memory().await.unwrap();
        let p = store.create_product(&sample_intake("SKU-1")).await.unwrap();

        store
            .mark_published(p.id, "MLM999", Some("https://example.com/p"))
            .await
            .unwrap();

        let p = store.product(p.id).await.unwrap().unwrap();
        assert_eq!(p.status, ProductStatus::Published);
        assert_eq!(p.marketplace_item_id.as_deref(), Some("MLM999"));
        assert!(p.published_at.is_some());
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = CatalogStore::in_memory().await.unwrap();
        let p = store.create_product(&sample_intake("SKU-1")).await.unwrap();
        let listing_id = store
            .create_live_listing(p.id, "MLM1", "Cable", 229.66)
            .await
            .unwrap();
        store
            .add_listing_metrics(listing_id, Utc::now(), 10, 1, 229.66, 0.0, 0, 0)
            .await
            .unwrap();
        store
            .log_action(&ActionEntry::new(crate::types::ActionKind::Published, Some(p.id)))
            .await
            .unwrap();

        store.delete_product(p.id).await.unwrap();

        assert!(store.product(p.id).await.unwrap().is_none());
        assert!(store.metrics(p.id).await.unwrap().is_none());
        assert!(store.listings_for_product(p.id).await.unwrap().is_empty());
        assert!(store.actions_for_product(p.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ab_test_creation_is_atomic() {
        let store = CatalogStore::in_memory().await.unwrap();
        let p = store.create_product(&sample_intake("SKU-1")).await.unwrap();

        let a = VariantDraft {
            marketplace_item_id: "MLM-A".to_string(),
            title: "Variant A".to_string(),
            description: None,
            price: 220.0,
        };
        let b = VariantDraft {
            marketplace_item_id: "MLM-B".to_string(),
            title: "Variant B".to_string(),
            description: None,
            price: 240.0,
        };

        let test = store
            .create_ab_test(p.id, TestType::Price, &a, &b)
            .await
            .unwrap();
        assert_eq!(test.status, TestStatus::Running);

        let listings = store.listings_for_product(p.id).await.unwrap();
        assert_eq!(listings.len(), 2);
        assert!(listings.iter().all(|l| l.is_ab_test));
        assert!(listings.iter().all(|l| l.ab_test_id == Some(test.id)));

        // Duplicate marketplace item id in variant B must roll everything back.
        let bad_b = VariantDraft {
            marketplace_item_id: "MLM-A".to_string(),
            ..b
        };
        let before = store.listings_for_product(p.id).await.unwrap().len();
        assert!(store
            .create_ab_test(p.id, TestType::Price, &a, &bad_b)
            .await
            .is_err());
        let after = store.listings_for_product(p.id).await.unwrap().len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_complete_ab_test_pauses_loser() {
        let store = CatalogStore::in_memory().await.unwrap();
        let p = store.create_product(&sample_intake("SKU-1")).await.unwrap();
        let a = VariantDraft {
            marketplace_item_id: "MLM-A".to_string(),
            title: "A".to_string(),
            description: None,
            price: 220.0,
        };
        let b = VariantDraft {
            marketplace_item_id: "MLM-B".to_string(),
            title: "B".to_string(),
            description: None,
            price: 240.0,
        };
        let test = store
            .create_ab_test(p.id, TestType::Price, &a, &b)
            .await
            .unwrap();

        let now = Utc::now();
        store
            .complete_ab_test(
                test.id,
                Winner::A,
                &serde_json::json!({"winner": "A"}),
                Some(test.variant_b_id),
                now,
            )
            .await
            .unwrap();

        let test = store.ab_test(test.id).await.unwrap().unwrap();
        assert_eq!(test.status, TestStatus::Completed);
        assert_eq!(test.winner, Some(Winner::A));
        assert!(test.ended_at.is_some());

        let loser = store.listing(test.variant_b_id).await.unwrap().unwrap();
        assert_eq!(loser.status, ListingStatus::Paused);
        assert!(loser.ended_at.is_some());

        let winner = store.listing(test.variant_a_id).await.unwrap().unwrap();
        assert_eq!(winner.status, ListingStatus::Active);

        assert!(store.running_tests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listing_metrics_aggregation_window() {
        let store = CatalogStore::in_memory().await.unwrap();
        let p = store.create_product(&sample_intake("SKU-1")).await.unwrap();
        let listing_id = store
            .create_live_listing(p.id, "MLM1", "Cable", 229.66)
            .await
            .unwrap();

        let now = Utc::now();
        store
            .add_listing_metrics(listing_id, now - chrono::Duration::days(10), 100, 5, 1000.0, 50.0, 0, 0)
            .await
            .unwrap();
        store
            .add_listing_metrics(listing_id, now - chrono::Duration::days(2), 200, 10, 2000.0, 25.0, 0, 0)
            .await
            .unwrap();

        let all = store
            .aggregate_listing_metrics(listing_id, None)
            .await
            .unwrap();
        assert_eq!(all.visits, 300);
        assert_eq!(all.sales, 15);
        assert!((all.conversion_rate - 5.0).abs() < 1e-9);

        let recent = store
            .aggregate_listing_metrics(listing_id, Some(now - chrono::Duration::days(7)))
            .await
            .unwrap();
        assert_eq!(recent.visits, 200);
        assert_eq!(recent.sales, 10);

        let window = store
            .product_window(p.id, now - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(window.sales, 10);
        assert!((window.ad_spend - 25.0).abs() < 1e-9);

        let empty = store
            .aggregate_listing_metrics(listing_id, Some(now + chrono::Duration::days(1)))
            .await
            .unwrap();
        assert_eq!(empty.visits, 0);
        assert_eq!(empty.conversion_rate, 0.0);
    }

    #[tokio::test]
    async fn test_latest_analysis_wins() {
        let store = CatalogStore::in_memory().await.unwrap();
        let p = store.create_product(&sample_intake("SKU-1")).await.unwrap();

        let competitors = serde_json::json!([]);
        store
            .insert_analysis(p.id, "cable usb", 100.0, 80.0, 120.0, CompetitionLevel::High, &competitors, 40.0)
            .await
            .unwrap();
        store
            .insert_analysis(p.id, "cable usb", 110.0, 90.0, 130.0, CompetitionLevel::Low, &competitors, 80.0)
            .await
            .unwrap();

        let latest = store.latest_analysis(p.id).await.unwrap().unwrap();
        assert_eq!(latest.competition_level, CompetitionLevel::Low);
        assert!((latest.avg_price - 110.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_action_log_append_and_read() {
        let store = CatalogStore::in_memory().await.unwrap();
        let p = store.create_product(&sample_intake("SKU-1")).await.unwrap();

        store
            .log_action(
                &ActionEntry::new(crate::types::ActionKind::PriceAdjusted, Some(p.id))
                    .reason("low CTR")
                    .change("229.66", "206.69"),
            )
            .await
            .unwrap();
        store
            .log_action(
                &ActionEntry::new(crate::types::ActionKind::PublishFailed, Some(p.id))
                    .failed("HTTP 500"),
            )
            .await
            .unwrap();

        let actions = store.actions_for_product(p.id).await.unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].action_type, "price_adjusted");
        assert!(actions[0].success);
        assert!(!actions[1].success);
        assert_eq!(actions[1].error_message.as_deref(), Some("HTTP 500"));

        let recent = store.recent_actions(1).await.unwrap();
        assert_eq!(recent.len(), 1);
    }
}
