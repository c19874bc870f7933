use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use stockbook_core::{DomainError, DomainResult, Entity, RecordId};

use crate::record::ItemRecord;

/// Stock item identifier (assigned by the store on insert).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub RecordId);

impl ItemId {
    pub fn new(id: RecordId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for ItemId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<RecordId>().map(Self)
    }
}

/// A stock item as held in memory.
///
/// Deserialization goes through [`ItemRecord`], so either naming convention
/// coming off the wire lands here in one shape. Serialization is always
/// snake_case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ItemRecord")]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub purchase_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub selling_price: Decimal,
    pub quantity: u32,
    pub category: String,
    pub supplier: String,
    /// Raw creation timestamp as returned by the store.
    pub date_added: Option<String>,
    pub image_url: Option<String>,
}

impl Item {
    /// Parsed creation time, if the stored timestamp is readable.
    pub fn added_at(&self) -> Option<DateTime<Utc>> {
        self.date_added.as_deref().and_then(parse_date_added)
    }

    pub fn stock_level(&self) -> StockLevel {
        StockLevel::from_quantity(self.quantity)
    }

    /// Apply a partial update in place. Only present fields are written.
    pub fn apply_patch(&mut self, patch: &ItemPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(price) = patch.purchase_price {
            self.purchase_price = price;
        }
        if let Some(price) = patch.selling_price {
            self.selling_price = price;
        }
        if let Some(quantity) = patch.quantity {
            self.quantity = quantity;
        }
        if let Some(category) = &patch.category {
            self.category = category.clone();
        }
        if let Some(supplier) = &patch.supplier {
            self.supplier = supplier.clone();
        }
        if let Some(image_url) = &patch.image_url {
            self.image_url = Some(image_url.clone());
        }
    }
}

impl Entity for Item {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Insert payload: everything but the store-assigned `id` and `date_added`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub title: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub purchase_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub selling_price: Decimal,
    pub quantity: u32,
    pub category: String,
    pub supplier: String,
    pub image_url: Option<String>,
}

impl NewItem {
    pub fn validate(&self) -> DomainResult<()> {
        if self.title.trim().is_empty() {
            return Err(DomainError::validation("title cannot be empty"));
        }
        ensure_non_negative("purchase_price", self.purchase_price)?;
        ensure_non_negative("selling_price", self.selling_price)?;
        Ok(())
    }
}

/// Partial update keyed by id.
///
/// `Some` means the field is present and is sent as-is, including zero and
/// empty values. `None` fields are left out of the update body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub purchase_price: Option<Decimal>,
    #[serde(
        default,
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub selling_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn purchase_price(mut self, price: Decimal) -> Self {
        self.purchase_price = Some(price);
        self
    }

    pub fn selling_price(mut self, price: Decimal) -> Self {
        self.selling_price = Some(price);
        self
    }

    pub fn quantity(mut self, quantity: u32) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn supplier(mut self, supplier: impl Into<String>) -> Self {
        self.supplier = Some(supplier.into());
        self
    }

    pub fn image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(DomainError::validation("title cannot be empty"));
            }
        }
        if let Some(price) = self.purchase_price {
            ensure_non_negative("purchase_price", price)?;
        }
        if let Some(price) = self.selling_price {
            ensure_non_negative("selling_price", price)?;
        }
        Ok(())
    }
}

/// Display tier for the quantity badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockLevel {
    /// More than 10 on hand.
    Plenty,
    /// 6 to 10 on hand.
    Low,
    /// 5 or fewer on hand.
    Critical,
}

impl StockLevel {
    pub fn from_quantity(quantity: u32) -> Self {
        if quantity > 10 {
            StockLevel::Plenty
        } else if quantity > 5 {
            StockLevel::Low
        } else {
            StockLevel::Critical
        }
    }
}

/// Sort newest first by creation time. Items without a readable timestamp go
/// last; ties keep their incoming order.
pub fn sort_newest_first(items: &mut [Item]) {
    items.sort_by(|a, b| b.added_at().cmp(&a.added_at()));
}

/// Two-decimal display form of a price (`12.5` -> `"12.50"`).
pub fn format_price(price: Decimal) -> String {
    let rounded = price.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{rounded:.2}")
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339 and the zone-less forms Postgres emits for `timestamp`
/// columns (interpreted as UTC), plus bare dates.
pub fn parse_date_added(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn ensure_non_negative(field: &str, value: Decimal) -> DomainResult<()> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(DomainError::validation(format!("{field} cannot be negative")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::prelude::FromPrimitive;
    use uuid::Uuid;

    fn item(n: u128, date_added: Option<&str>) -> Item {
        Item {
            id: ItemId(RecordId::from_uuid(Uuid::from_u128(n))),
            title: format!("Item {n}"),
            purchase_price: Decimal::new(100, 2),
            selling_price: Decimal::new(150, 2),
            quantity: 3,
            category: "notebooks".to_string(),
            supplier: "Atlas".to_string(),
            date_added: date_added.map(str::to_string),
            image_url: None,
        }
    }

    #[test]
    fn stock_level_thresholds() {
        assert_eq!(StockLevel::from_quantity(11), StockLevel::Plenty);
        assert_eq!(StockLevel::from_quantity(10), StockLevel::Low);
        assert_eq!(StockLevel::from_quantity(6), StockLevel::Low);
        assert_eq!(StockLevel::from_quantity(5), StockLevel::Critical);
        assert_eq!(StockLevel::from_quantity(0), StockLevel::Critical);
    }

    #[test]
    fn format_price_rounds_to_two_decimals() {
        assert_eq!(format_price(Decimal::new(125, 1)), "12.50");
        assert_eq!(format_price(Decimal::ZERO), "0.00");
        assert_eq!(format_price(Decimal::new(19999, 3)), "20.00");
        assert_eq!(format_price(Decimal::new(1005, 3)), "1.01");
    }

    #[test]
    fn parse_date_added_accepts_store_formats() {
        assert!(parse_date_added("2024-11-17T08:30:00.123456+00:00").is_some());
        assert!(parse_date_added("2024-11-17T08:30:00Z").is_some());
        assert!(parse_date_added("2024-11-17T08:30:00.5").is_some());
        assert!(parse_date_added("2024-11-17 08:30:00").is_some());
        assert!(parse_date_added("2024-11-17").is_some());
        assert!(parse_date_added("not a date").is_none());
        assert!(parse_date_added("").is_none());
    }

    #[test]
    fn sort_puts_newest_first_and_undated_last() {
        let mut items = vec![
            item(1, Some("2024-01-01T00:00:00Z")),
            item(2, None),
            item(3, Some("2024-03-01T00:00:00Z")),
            item(4, Some("garbage")),
            item(5, Some("2024-02-01T00:00:00Z")),
        ];
        sort_newest_first(&mut items);
        let order: Vec<u128> = items.iter().map(|i| i.id.0.as_uuid().as_u128()).collect();
        assert_eq!(order, vec![3, 5, 1, 2, 4]);
    }

    #[test]
    fn new_item_rejects_blank_title_and_negative_price() {
        let mut new_item = NewItem {
            title: "  ".to_string(),
            purchase_price: Decimal::ONE,
            selling_price: Decimal::ONE,
            quantity: 1,
            category: "pens".to_string(),
            supplier: "Atlas".to_string(),
            image_url: None,
        };
        assert!(matches!(new_item.validate(), Err(DomainError::Validation(_))));

        new_item.title = "Gel pen".to_string();
        new_item.selling_price = Decimal::new(-1, 0);
        assert!(matches!(new_item.validate(), Err(DomainError::Validation(_))));

        new_item.selling_price = Decimal::ZERO;
        assert!(new_item.validate().is_ok());
    }

    #[test]
    fn patch_serializes_only_present_fields_including_zero() {
        let patch = ItemPatch::default().quantity(0).supplier("");
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({ "quantity": 0, "supplier": "" }));
        assert!(!patch.is_empty());
        assert!(ItemPatch::default().is_empty());
    }

    #[test]
    fn apply_patch_writes_zero_quantity() {
        let mut target = item(1, None);
        target.apply_patch(&ItemPatch::default().quantity(0).selling_price(Decimal::ZERO));
        assert_eq!(target.quantity, 0);
        assert_eq!(target.selling_price, Decimal::ZERO);
        assert_eq!(target.title, "Item 1");
    }

    #[test]
    fn item_serializes_snake_case_with_numeric_prices() {
        let json = serde_json::to_value(item(1, Some("2024-01-01T00:00:00Z"))).unwrap();
        assert_eq!(json["purchase_price"], serde_json::json!(1.0));
        assert_eq!(json["selling_price"], serde_json::json!(1.5));
        assert_eq!(json["date_added"], "2024-01-01T00:00:00Z");
        assert!(json.get("purchasePrice").is_none());
    }

    proptest! {
        #[test]
        fn sorted_collection_is_non_increasing(days in proptest::collection::vec(proptest::option::of(0i64..3650), 0..40)) {
            let base = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
            let mut items: Vec<Item> = days
                .iter()
                .enumerate()
                .map(|(n, d)| {
                    let date = d.map(|d| (base + chrono::Duration::days(d)).to_rfc3339());
                    item(n as u128, date.as_deref())
                })
                .collect();
            sort_newest_first(&mut items);
            for pair in items.windows(2) {
                prop_assert!(pair[0].added_at() >= pair[1].added_at());
            }
        }

        #[test]
        fn formatted_price_always_has_two_decimals(cents in 0u32..10_000_000) {
            let price = Decimal::from_u32(cents).unwrap() / Decimal::ONE_HUNDRED;
            let formatted = format_price(price);
            let (_, frac) = formatted.split_once('.').unwrap();
            prop_assert_eq!(frac.len(), 2);
        }
    }
}
