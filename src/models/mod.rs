mod attempt;
mod invoice;
mod license;
mod product;
mod user;

pub use attempt::*;
pub use invoice::*;
pub use license::*;
pub use product::*;
pub use user::*;
