mod activate;
mod register;
mod verify;

pub use activate::{activate_domain, deactivate_domain, list_domains};
pub use register::register;
pub use verify::{verify_code, verify_raw};
