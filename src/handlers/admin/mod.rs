mod attempts;
mod licenses;
mod products;
mod users;

pub use attempts::{attempt_stats, purge_attempts, query_attempts, suspicious_ips};
pub use licenses::{create_license, get_license, renew_license, set_license_status};
pub use products::{create_product, list_products};
pub use users::create_user;
