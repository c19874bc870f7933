//! Display model for one item in the listing.

use serde::Serialize;

use stockbook_inventory::{format_price, Item, ItemId, StockLevel};

pub const INVALID_DATE: &str = "Invalid date";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "url", rename_all = "lowercase")]
pub enum CardImage {
    Photo(String),
    /// Placeholder icon: no image, or the image failed to load.
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemCard {
    pub id: ItemId,
    pub title: String,
    pub purchase_price: String,
    pub selling_price: String,
    pub quantity: u32,
    pub stock_level: StockLevel,
    pub supplier: String,
    pub category: String,
    pub date_label: String,
    pub image: CardImage,
}

impl ItemCard {
    pub fn new(item: &Item) -> Self {
        Self {
            id: item.id,
            title: or_default(&item.title, "Untitled Book"),
            purchase_price: format_price(item.purchase_price),
            selling_price: format_price(item.selling_price),
            quantity: item.quantity,
            stock_level: item.stock_level(),
            supplier: or_default(&item.supplier, "Unknown supplier"),
            category: or_default(&item.category, "Uncategorized"),
            date_label: date_label(item),
            image: match item.image_url.as_deref().map(str::trim) {
                Some(url) if !url.is_empty() => CardImage::Photo(url.to_string()),
                _ => CardImage::Placeholder,
            },
        }
    }

    /// The image could not be loaded; show the placeholder from now on.
    pub fn mark_image_failed(&mut self) {
        self.image = CardImage::Placeholder;
    }
}

impl From<&Item> for ItemCard {
    fn from(item: &Item) -> Self {
        ItemCard::new(item)
    }
}

fn or_default(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// `Nov 17, 2024`, or [`INVALID_DATE`] when the stored date is missing or
/// unreadable.
fn date_label(item: &Item) -> String {
    item.added_at()
        .map(|at| at.format("%b %-d, %Y").to_string())
        .unwrap_or_else(|| INVALID_DATE.to_string())
}
