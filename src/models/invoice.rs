use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InvoiceStatus {
    Paid,
    Pending,
    Void,
}

/// Initial invoice record written alongside license creation. Rendering and
/// delivery belong to the billing collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub license_id: String,
    pub user_id: String,
    pub product_id: String,
    pub amount_cents: i64,
    pub status: InvoiceStatus,
    pub created_at: i64,
}
