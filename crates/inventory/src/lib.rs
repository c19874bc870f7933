//! Inventory domain module.
//!
//! The stock item data model and the mapping between the store's persisted
//! shape and the in-memory shape. Pure logic only (no IO, no HTTP).

pub mod item;
pub mod record;

pub use item::{
    format_price, parse_date_added, sort_newest_first, Item, ItemId, ItemPatch, NewItem,
    StockLevel,
};
pub use record::ItemRecord;
