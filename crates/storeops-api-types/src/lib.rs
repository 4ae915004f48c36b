//! Wire schemas for the storeops admin API.
//!
//! The backend answers with loosely-typed JSON. Every record here is decoded
//! with `#[serde(default)]` so absent fields get a value, then passed through
//! its [`Sanitize`] implementation, which is the single place that normalises
//! a record of that type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("failed to decode `{schema}` payload: {source}")]
    Decode {
        schema: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("envelope for `{schema}` carried no data")]
    MissingData { schema: &'static str },
}

/// Normalises a decoded record: trims text, clamps negative quantities and
/// amounts, and fills derived defaults.
pub trait Sanitize: Sized {
    const SCHEMA: &'static str;

    fn sanitize(self) -> Self;
}

impl<T: Sanitize> Sanitize for Vec<T> {
    const SCHEMA: &'static str = T::SCHEMA;

    fn sanitize(self) -> Self {
        self.into_iter().map(Sanitize::sanitize).collect()
    }
}

/// Decode a JSON value into a sanitized record.
pub fn decode<T: DeserializeOwned + Sanitize>(value: Value) -> Result<T, TypesError> {
    serde_json::from_value::<T>(value)
        .map(Sanitize::sanitize)
        .map_err(|source| TypesError::Decode {
            schema: T::SCHEMA,
            source,
        })
}

fn clean_text(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.len() == value.len() {
        value
    } else {
        trimmed.to_string()
    }
}

fn clean_opt_text(value: Option<String>) -> Option<String> {
    value
        .map(clean_text)
        .filter(|value| !value.is_empty())
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

// ============================================================================
// Envelopes
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

/// Successful response envelope: `{ success, data, pagination?, message, timestamp }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

fn default_true() -> bool {
    true
}

impl<T> ApiEnvelope<T> {
    pub fn into_data(self, schema: &'static str) -> Result<T, TypesError> {
        self.data.ok_or(TypesError::MissingData { schema })
    }
}

/// Error response body: `{ success: false, error, message }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiErrorBody {
    pub success: bool,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl ApiErrorBody {
    /// The most specific human-readable text the backend supplied.
    pub fn detail(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

/// A list page: the envelope's `data` array plus its `pagination` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub pagination: Pagination,
}

impl<T: Sanitize> Sanitize for Paginated<T> {
    const SCHEMA: &'static str = T::SCHEMA;

    fn sanitize(self) -> Self {
        Self {
            items: self.items.sanitize(),
            pagination: self.pagination,
        }
    }
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Active,
    #[default]
    Draft,
    Archived,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub sku: String,
    pub description: Option<String>,
    pub price: f64,
    pub stock: i64,
    pub category_id: Option<String>,
    pub status: ProductStatus,
    pub image_url: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl Sanitize for Product {
    const SCHEMA: &'static str = "product";

    fn sanitize(self) -> Self {
        Self {
            id: clean_text(self.id),
            name: clean_text(self.name),
            sku: clean_text(self.sku).to_uppercase(),
            description: clean_opt_text(self.description),
            price: non_negative(self.price),
            stock: self.stock.max(0),
            category_id: clean_opt_text(self.category_id),
            image_url: clean_opt_text(self.image_url),
            ..self
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub parent_id: Option<String>,
    pub product_count: u64,
}

impl Sanitize for Category {
    const SCHEMA: &'static str = "category";

    fn sanitize(self) -> Self {
        let name = clean_text(self.name);
        let slug = match clean_text(self.slug) {
            slug if slug.is_empty() => name.to_lowercase().replace(char::is_whitespace, "-"),
            slug => slug,
        };
        Self {
            id: clean_text(self.id),
            name,
            slug,
            parent_id: clean_opt_text(self.parent_id),
            ..self
        }
    }
}

// ============================================================================
// Orders & customers
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub customer_id: Option<String>,
    pub customer_name: String,
    pub status: OrderStatus,
    pub total_amount: f64,
    pub items: Vec<OrderItem>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

impl Sanitize for Order {
    const SCHEMA: &'static str = "order";

    fn sanitize(self) -> Self {
        let items: Vec<OrderItem> = self
            .items
            .into_iter()
            .map(|item| OrderItem {
                product_id: clean_text(item.product_id),
                name: clean_text(item.name),
                quantity: item.quantity.max(0),
                unit_price: non_negative(item.unit_price),
            })
            .collect();
        // A missing total is recomputed from the line items.
        let total_amount = match non_negative(self.total_amount) {
            total if total > 0.0 => total,
            _ => items
                .iter()
                .map(|item| item.unit_price * item.quantity as f64)
                .sum(),
        };
        Self {
            id: clean_text(self.id),
            order_number: clean_text(self.order_number),
            customer_id: clean_opt_text(self.customer_id),
            customer_name: clean_text(self.customer_name),
            total_amount,
            items,
            ..self
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub total_orders: u64,
    pub total_spent: f64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

impl Sanitize for Customer {
    const SCHEMA: &'static str = "customer";

    fn sanitize(self) -> Self {
        Self {
            id: clean_text(self.id),
            name: clean_text(self.name),
            email: clean_text(self.email).to_lowercase(),
            phone: clean_opt_text(self.phone),
            total_spent: non_negative(self.total_spent),
            ..self
        }
    }
}

// ============================================================================
// Aggregates
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_revenue: f64,
    pub total_orders: u64,
    pub total_customers: u64,
    pub total_products: u64,
    pub pending_orders: u64,
    pub low_stock_products: u64,
    pub revenue_change: f64,
}

impl Sanitize for DashboardStats {
    const SCHEMA: &'static str = "dashboard_stats";

    fn sanitize(self) -> Self {
        Self {
            total_revenue: non_negative(self.total_revenue),
            revenue_change: if self.revenue_change.is_finite() {
                self.revenue_change
            } else {
                0.0
            },
            ..self
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DashboardOverview {
    pub stats: DashboardStats,
    pub recent_orders: Vec<Order>,
    pub top_products: Vec<Product>,
}

impl Sanitize for DashboardOverview {
    const SCHEMA: &'static str = "dashboard_overview";

    fn sanitize(self) -> Self {
        Self {
            stats: self.stats.sanitize(),
            recent_orders: self.recent_orders.sanitize(),
            top_products: self.top_products.sanitize(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SalesPoint {
    pub date: String,
    pub revenue: f64,
    pub orders: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SalesAnalytics {
    pub period: String,
    pub total_revenue: f64,
    pub points: Vec<SalesPoint>,
}

impl Sanitize for SalesAnalytics {
    const SCHEMA: &'static str = "sales_analytics";

    fn sanitize(self) -> Self {
        let points: Vec<SalesPoint> = self
            .points
            .into_iter()
            .map(|point| SalesPoint {
                date: clean_text(point.date),
                revenue: non_negative(point.revenue),
                ..point
            })
            .collect();
        let total_revenue = match non_negative(self.total_revenue) {
            total if total > 0.0 => total,
            _ => points.iter().map(|point| point.revenue).sum(),
        };
        Self {
            period: match clean_text(self.period) {
                period if period.is_empty() => "30d".to_string(),
                period => period,
            },
            total_revenue,
            points,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActivityItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

impl Sanitize for ActivityItem {
    const SCHEMA: &'static str = "activity";

    fn sanitize(self) -> Self {
        Self {
            id: clean_text(self.id),
            kind: clean_text(self.kind),
            message: clean_text(self.message),
            ..self
        }
    }
}

// ============================================================================
// Event stream
// ============================================================================

/// One `data:` payload on the admin event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    #[serde(default)]
    pub data: Option<Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn product_absent_fields_fall_back_to_defaults() {
        let product: Product = decode(json!({ "id": " p-1 ", "name": "Mug" })).expect("product");
        assert_eq!(product.id, "p-1");
        assert_eq!(product.price, 0.0);
        assert_eq!(product.stock, 0);
        assert_eq!(product.status, ProductStatus::Draft);
        assert!(product.created_at.is_none());
    }

    #[test]
    fn product_negative_values_are_clamped() {
        let product: Product = decode(json!({
            "id": "p-2",
            "sku": " mug-01 ",
            "price": -3.5,
            "stock": -7,
            "description": "   "
        }))
        .expect("product");
        assert_eq!(product.sku, "MUG-01");
        assert_eq!(product.price, 0.0);
        assert_eq!(product.stock, 0);
        assert!(product.description.is_none());
    }

    #[test]
    fn order_total_is_recomputed_when_missing() {
        let order: Order = decode(json!({
            "id": "o-1",
            "status": "shipped",
            "items": [
                { "productId": "p-1", "name": "Mug", "quantity": 2, "unitPrice": 4.0 },
                { "productId": "p-2", "name": "Tea", "quantity": 1, "unitPrice": 3.0 }
            ]
        }))
        .expect("order");
        assert_eq!(order.status, OrderStatus::Shipped);
        assert_eq!(order.total_amount, 11.0);
    }

    #[test]
    fn customer_email_is_normalised() {
        let customer: Customer =
            decode(json!({ "id": "c-1", "email": " Ada@Example.COM " })).expect("customer");
        assert_eq!(customer.email, "ada@example.com");
    }

    #[test]
    fn category_slug_derives_from_name() {
        let category: Category =
            decode(json!({ "id": "k-1", "name": "Kitchen Ware" })).expect("category");
        assert_eq!(category.slug, "kitchen-ware");
    }

    #[test]
    fn zeroed_fallback_stats_decode_cleanly() {
        let stats: DashboardStats = decode(json!({})).expect("stats");
        assert_eq!(stats, DashboardStats::default());
    }

    #[test]
    fn envelope_carries_pagination_and_timestamp() {
        let envelope: ApiEnvelope<Vec<Order>> = serde_json::from_value(json!({
            "success": true,
            "data": [],
            "pagination": { "page": 1, "limit": 20, "total": 0, "totalPages": 0 },
            "message": "ok",
            "timestamp": "2026-10-16T09:30:00Z"
        }))
        .expect("envelope");
        assert!(envelope.success);
        assert_eq!(envelope.pagination.as_ref().map(|p| p.limit), Some(20));
        assert!(envelope.timestamp.is_some());
        assert!(envelope.into_data("orders").expect("data").is_empty());
    }

    #[test]
    fn envelope_without_data_is_reported() {
        let envelope: ApiEnvelope<DashboardStats> =
            serde_json::from_value(json!({ "success": true })).expect("envelope");
        let err = envelope.into_data("dashboard_stats").expect_err("missing data");
        assert!(matches!(err, TypesError::MissingData { .. }));
    }

    #[test]
    fn error_body_prefers_message() {
        let body: ApiErrorBody = serde_json::from_value(json!({
            "success": false,
            "error": "VALIDATION",
            "message": "Price must be positive"
        }))
        .expect("error body");
        assert_eq!(body.detail(), Some("Price must be positive"));
    }

    #[test]
    fn stream_message_reads_type_field() {
        let message: StreamMessage = serde_json::from_str(
            r#"{"type":"order_update","timestamp":"2026-10-16T09:30:00Z","data":{"id":"o-9"}}"#,
        )
        .expect("message");
        assert_eq!(message.kind, "order_update");
        assert_eq!(message.data, Some(json!({ "id": "o-9" })));
    }
}
