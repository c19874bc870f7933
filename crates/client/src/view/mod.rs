//! View models a UI binds to. No rendering happens here.

pub mod banner;
pub mod card;
pub mod form;

pub use banner::ConnectionBanner;
pub use card::{CardImage, ItemCard};
pub use form::{FormError, ItemForm};
