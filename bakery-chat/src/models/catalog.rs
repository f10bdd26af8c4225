use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only product record from the storefront catalog.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub category: String,
    pub status: String,
    pub description: Option<String>,
    pub image: Option<String>,
}

/// A customer's request to ask about a catalog item, parked in client storage
/// until the chat view turns it into the first message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingInquiry {
    pub product_name: Option<String>,
    pub product_image: Option<String>,
    pub product_price: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl PendingInquiry {
    pub fn for_item(item: &CatalogItem) -> Self {
        Self {
            product_name: Some(item.name.clone()).filter(|n| !n.trim().is_empty()),
            product_image: item.image.clone().filter(|url| !url.trim().is_empty()),
            product_price: Some(item.price),
            created_at: Utc::now(),
        }
    }
}
