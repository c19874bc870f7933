//! Persisted-shape <-> in-memory mapping.
//!
//! Rows come back from the store in snake_case, while older clients and
//! cached payloads carry camelCase keys for the same fields. Both are
//! accepted here and nowhere else.

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use serde_json::Value;

use stockbook_core::{DomainError, DomainResult};

use crate::item::{Item, ItemId};

/// Lenient wire form of an item.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub purchase_price: Option<Value>,
    #[serde(default, rename = "purchasePrice")]
    pub purchase_price_camel: Option<Value>,
    #[serde(default)]
    pub selling_price: Option<Value>,
    #[serde(default, rename = "sellingPrice")]
    pub selling_price_camel: Option<Value>,
    #[serde(default)]
    pub quantity: Option<Value>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub supplier: Option<String>,
    #[serde(default)]
    pub date_added: Option<String>,
    #[serde(default, rename = "dateAdded")]
    pub date_added_camel: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, rename = "imageUrl")]
    pub image_url_camel: Option<String>,
}

impl Item {
    /// Map a wire record into the in-memory shape.
    ///
    /// The snake_case field wins when both conventions are populated. Missing
    /// numbers default to zero; empty strings for optional text become `None`.
    pub fn from_record(record: ItemRecord) -> DomainResult<Self> {
        let purchase_price = decimal_field(
            "purchase_price",
            first_present(record.purchase_price, record.purchase_price_camel),
        )?;
        let selling_price = decimal_field(
            "selling_price",
            first_present(record.selling_price, record.selling_price_camel),
        )?;
        let quantity = quantity_field(record.quantity)?;

        Ok(Item {
            id: record.id,
            title: record.title.unwrap_or_default(),
            purchase_price,
            selling_price,
            quantity,
            category: record.category.unwrap_or_default(),
            supplier: record.supplier.unwrap_or_default(),
            date_added: non_empty(record.date_added).or_else(|| non_empty(record.date_added_camel)),
            image_url: non_empty(record.image_url).or_else(|| non_empty(record.image_url_camel)),
        })
    }
}

impl TryFrom<ItemRecord> for Item {
    type Error = DomainError;

    fn try_from(record: ItemRecord) -> Result<Self, Self::Error> {
        Item::from_record(record)
    }
}

fn first_present(snake: Option<Value>, camel: Option<Value>) -> Option<Value> {
    match snake {
        Some(Value::Null) | None => camel,
        some => some,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Numeric columns arrive as JSON numbers, or as strings for `numeric`
/// columns exported by some tooling.
fn decimal_field(field: &str, value: Option<Value>) -> DomainResult<Decimal> {
    let decimal = match value {
        None | Some(Value::Null) => return Ok(Decimal::ZERO),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        Some(Value::String(s)) => s.trim().parse::<Decimal>().ok(),
        Some(_) => None,
    }
    .ok_or_else(|| DomainError::malformed(format!("{field} is not a number")))?;

    if decimal.is_sign_negative() && !decimal.is_zero() {
        return Err(DomainError::validation(format!("{field} cannot be negative")));
    }
    Ok(decimal)
}

fn quantity_field(value: Option<Value>) -> DomainResult<u32> {
    match value {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => {
            if let Some(q) = n.as_u64() {
                return u32::try_from(q)
                    .map_err(|_| DomainError::malformed("quantity out of range"));
            }
            if n.as_i64().is_some() {
                return Err(DomainError::validation("quantity cannot be negative"));
            }
            Err(DomainError::malformed("quantity is not an integer"))
        }
        Some(Value::String(s)) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| DomainError::malformed("quantity is not an integer")),
        Some(_) => Err(DomainError::malformed("quantity is not an integer")),
    }
}
