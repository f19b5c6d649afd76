use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Item identifier on the remote marketplace (maps sales to this product)
    pub marketplace_item_id: Option<String>,
    /// Days until the license expires (None = lifetime)
    pub license_days: Option<i32>,
    /// Days of support included with a new license
    pub support_days: Option<i32>,
    /// Default domain quota stamped onto new licenses
    pub max_domains: i64,
    /// Remaining stock (None = unlimited)
    pub stock: Option<i64>,
    pub price_cents: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateProduct {
    pub name: String,
    #[serde(default)]
    pub marketplace_item_id: Option<String>,
    #[serde(default)]
    pub license_days: Option<i32>,
    #[serde(default)]
    pub support_days: Option<i32>,
    #[serde(default = "default_max_domains")]
    pub max_domains: i64,
    #[serde(default)]
    pub stock: Option<i64>,
    #[serde(default)]
    pub price_cents: i64,
}

fn default_max_domains() -> i64 {
    1
}
