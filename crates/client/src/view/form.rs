//! Add/edit form state.
//!
//! Fields are held as the text the user typed. Numeric fields are coerced on
//! submit the way browser number inputs are read: the longest numeric prefix
//! is taken and anything unreadable becomes 0.

use core::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

use stockbook_inventory::{Item, ItemId, ItemPatch, NewItem};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("{0} is required")]
    Required(&'static str),
    #[error("{0} must be 0 or more")]
    BelowMinimum(&'static str),
    #[error("{0} is too large")]
    OutOfRange(&'static str),
    #[error("the form is not editing an existing item")]
    NotEditing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Editing {
    id: ItemId,
    title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemForm {
    pub title: String,
    pub purchase_price: String,
    pub selling_price: String,
    pub quantity: String,
    pub category: String,
    pub supplier: String,
    pub image_url: String,
    editing: Option<Editing>,
    confirming_delete: bool,
}

impl ItemForm {
    /// Blank form for a new item.
    pub fn new() -> Self {
        Self::default()
    }

    /// Form pre-filled from an existing item.
    pub fn edit(item: &Item) -> Self {
        Self {
            title: item.title.clone(),
            purchase_price: item.purchase_price.normalize().to_string(),
            selling_price: item.selling_price.normalize().to_string(),
            quantity: item.quantity.to_string(),
            category: item.category.clone(),
            supplier: item.supplier.clone(),
            image_url: item.image_url.clone().unwrap_or_default(),
            editing: Some(Editing {
                id: item.id,
                title: item.title.clone(),
            }),
            confirming_delete: false,
        }
    }

    pub fn is_edit(&self) -> bool {
        self.editing.is_some()
    }

    pub fn editing_id(&self) -> Option<ItemId> {
        self.editing.as_ref().map(|e| e.id)
    }

    pub fn heading(&self) -> &'static str {
        if self.is_edit() { "Edit Book" } else { "Add New Book" }
    }

    pub fn submit_label(&self) -> &'static str {
        if self.is_edit() { "Update Book" } else { "Add Book" }
    }

    /// Required, minimum-value and range checks, first failure wins.
    ///
    /// Like a number input, a value that does not read as a number passes
    /// the minimum check and is coerced on submit. A number too large to be
    /// stored is rejected rather than coerced.
    pub fn validate(&self) -> Result<(), FormError> {
        let required = [
            ("title", &self.title),
            ("category", &self.category),
            ("supplier", &self.supplier),
            ("purchase_price", &self.purchase_price),
            ("selling_price", &self.selling_price),
            ("quantity", &self.quantity),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(FormError::Required(field));
            }
        }

        let numeric = [
            ("purchase_price", &self.purchase_price),
            ("selling_price", &self.selling_price),
            ("quantity", &self.quantity),
        ];
        for (field, value) in numeric {
            match read_number(value) {
                Reading::Negative => return Err(FormError::BelowMinimum(field)),
                Reading::TooLarge => return Err(FormError::OutOfRange(field)),
                Reading::Unreadable | Reading::Value(_) => {}
            }
        }
        if leading_integer(&self.quantity).is_some_and(|q| q > u64::from(u32::MAX)) {
            return Err(FormError::OutOfRange("quantity"));
        }
        Ok(())
    }

    /// Insert payload for the current field values.
    pub fn submit(&self) -> Result<NewItem, FormError> {
        self.validate()?;
        Ok(NewItem {
            title: self.title.clone(),
            purchase_price: coerce_price(&self.purchase_price),
            selling_price: coerce_price(&self.selling_price),
            quantity: coerce_quantity(&self.quantity),
            category: self.category.clone(),
            supplier: self.supplier.clone(),
            image_url: non_empty(&self.image_url),
        })
    }

    /// Full update for the item being edited. An empty image field leaves
    /// the stored image alone.
    pub fn submit_patch(&self) -> Result<(ItemId, ItemPatch), FormError> {
        let id = self.editing_id().ok_or(FormError::NotEditing)?;
        let item = self.submit()?;
        let patch = ItemPatch {
            title: Some(item.title),
            purchase_price: Some(item.purchase_price),
            selling_price: Some(item.selling_price),
            quantity: Some(item.quantity),
            category: Some(item.category),
            supplier: Some(item.supplier),
            image_url: item.image_url,
        };
        Ok((id, patch))
    }

    /// Open the delete confirmation. Only an existing item can be deleted.
    pub fn request_delete(&mut self) -> bool {
        self.confirming_delete = self.is_edit();
        self.confirming_delete
    }

    pub fn cancel_delete(&mut self) {
        self.confirming_delete = false;
    }

    pub fn is_confirming_delete(&self) -> bool {
        self.confirming_delete
    }

    /// Confirm a requested delete and return the id to delete.
    pub fn confirm_delete(&mut self) -> Option<ItemId> {
        if !self.confirming_delete {
            return None;
        }
        self.confirming_delete = false;
        self.editing_id()
    }

    pub fn delete_prompt(&self) -> Option<String> {
        let editing = self.editing.as_ref().filter(|_| self.confirming_delete)?;
        Some(format!(
            "Are you sure you want to delete \"{}\"? This action cannot be undone.",
            editing.title
        ))
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Longest prefix of `s` (after leading whitespace) that reads as a decimal
/// number with optional sign, fraction and exponent.
fn float_prefix(s: &str) -> &str {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let int_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut digits = end - int_start;
    if bytes.get(end) == Some(&b'.') {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while bytes.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        if digits > 0 || frac_end > frac_start {
            digits += frac_end - frac_start;
            end = frac_end;
        }
    }
    if digits == 0 {
        return "";
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    &s[..end]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reading {
    Unreadable,
    Value(Decimal),
    Negative,
    /// Numeric text beyond what a `Decimal` holds.
    TooLarge,
}

fn read_number(s: &str) -> Reading {
    let prefix = float_prefix(s);
    if prefix.is_empty() {
        return Reading::Unreadable;
    }
    let negative = prefix.starts_with('-');
    let unsigned = prefix.trim_start_matches(['+', '-']);
    let mantissa_end = unsigned.find(['e', 'E']).unwrap_or(unsigned.len());
    let (mantissa, exponent) = unsigned.split_at(mantissa_end);
    let mantissa = mantissa.trim_end_matches('.');
    let mantissa = if mantissa.starts_with('.') {
        format!("0{mantissa}")
    } else {
        mantissa.to_string()
    };

    let parsed = if exponent.is_empty() {
        Decimal::from_str(&mantissa)
    } else {
        Decimal::from_scientific(&format!("{mantissa}{exponent}"))
    };
    let value = match parsed {
        Ok(value) => value,
        // Too small to represent: reads as zero.
        Err(_)
            if exponent.get(1..).is_some_and(|e| e.starts_with('-'))
                && Decimal::from_str(&mantissa).is_ok() =>
        {
            Decimal::ZERO
        }
        Err(_) => return Reading::TooLarge,
    };
    if negative && !value.is_zero() {
        Reading::Negative
    } else {
        Reading::Value(value)
    }
}

/// Price text to a non-negative decimal. Unreadable, negative and
/// unrepresentable text is 0; [`ItemForm::validate`] rejects the latter two.
pub fn coerce_price(s: &str) -> Decimal {
    match read_number(s) {
        Reading::Value(value) => value,
        Reading::Unreadable | Reading::Negative | Reading::TooLarge => Decimal::ZERO,
    }
}

/// Digits before any fraction or exponent, `None` when there are none or
/// the text is negative.
fn leading_integer(s: &str) -> Option<u64> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    if negative || end == 0 {
        return None;
    }
    Some(digits[..end].parse::<u64>().unwrap_or(u64::MAX))
}

/// Quantity text to a count: the integer prefix, 0 when unreadable or
/// negative. Saturates at `u32::MAX`.
pub fn coerce_quantity(s: &str) -> u32 {
    leading_integer(s).map_or(0, |q| u32::try_from(q).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockbook_core::RecordId;

    fn filled() -> ItemForm {
        ItemForm {
            title: "Gel pen".to_string(),
            purchase_price: "40".to_string(),
            selling_price: "55.5".to_string(),
            quantity: "12".to_string(),
            category: "gel-pens".to_string(),
            supplier: "Nova".to_string(),
            ..ItemForm::new()
        }
    }

    fn stored() -> Item {
        Item {
            id: ItemId::new(RecordId::new()),
            title: "A5 exercise book".to_string(),
            purchase_price: Decimal::new(12050, 2),
            selling_price: Decimal::ZERO,
            quantity: 0,
            category: "a5-exercise-books".to_string(),
            supplier: "Atlas".to_string(),
            date_added: None,
            image_url: Some("https://cdn.example/a5.png".to_string()),
        }
    }

    #[test]
    fn coerces_like_number_inputs() {
        assert_eq!(coerce_price("12.5abc"), Decimal::new(125, 1));
        assert_eq!(coerce_price("  .5"), Decimal::new(5, 1));
        assert_eq!(coerce_price("7."), Decimal::from(7));
        assert_eq!(coerce_price("1e2"), Decimal::from(100));
        assert_eq!(coerce_price("abc"), Decimal::ZERO);
        assert_eq!(coerce_price("-0"), Decimal::ZERO);
        assert_eq!(coerce_quantity("3.9"), 3);
        assert_eq!(coerce_quantity("  42 boxes"), 42);
        assert_eq!(coerce_quantity("many"), 0);
        assert_eq!(coerce_quantity("-4"), 0);
    }

    #[test]
    fn submit_builds_new_item() {
        let item = filled().submit().unwrap();
        assert_eq!(item.purchase_price, Decimal::from(40));
        assert_eq!(item.selling_price, Decimal::new(555, 1));
        assert_eq!(item.quantity, 12);
        assert!(item.image_url.is_none());
    }

    #[test]
    fn required_and_minimum_checks() {
        let mut form = filled();
        form.supplier = " ".to_string();
        assert_eq!(form.validate(), Err(FormError::Required("supplier")));

        let mut form = filled();
        form.quantity = "-1".to_string();
        assert_eq!(form.submit(), Err(FormError::BelowMinimum("quantity")));

        let mut form = filled();
        form.selling_price = "12abc".to_string();
        assert!(form.validate().is_ok());
    }

    #[test]
    fn exponent_and_oversized_numbers_are_checked() {
        let mut form = filled();
        form.purchase_price = "-1e2".to_string();
        assert_eq!(form.validate(), Err(FormError::BelowMinimum("purchase_price")));

        let mut form = filled();
        form.selling_price = "1e40".to_string();
        assert_eq!(form.submit(), Err(FormError::OutOfRange("selling_price")));

        let mut form = filled();
        form.purchase_price = "123456789012345678901234567890".to_string();
        assert_eq!(form.validate(), Err(FormError::OutOfRange("purchase_price")));

        let mut form = filled();
        form.quantity = "5000000000".to_string();
        assert_eq!(form.validate(), Err(FormError::OutOfRange("quantity")));

        let mut form = filled();
        form.selling_price = "1e-40".to_string();
        assert_eq!(form.submit().unwrap().selling_price, Decimal::ZERO);
    }

    #[test]
    fn edit_prefills_and_patches_every_field() {
        let item = stored();
        let form = ItemForm::edit(&item);
        assert!(form.is_edit());
        assert_eq!(form.heading(), "Edit Book");
        assert_eq!(form.submit_label(), "Update Book");
        assert_eq!(form.purchase_price, "120.5");
        assert_eq!(form.selling_price, "0");
        assert_eq!(form.quantity, "0");
        assert_eq!(form.image_url, "https://cdn.example/a5.png");

        let (id, patch) = form.submit_patch().unwrap();
        assert_eq!(id, item.id);
        assert_eq!(patch.quantity, Some(0));
        assert_eq!(patch.selling_price, Some(Decimal::ZERO));
        assert_eq!(patch.image_url.as_deref(), Some("https://cdn.example/a5.png"));
    }

    #[test]
    fn new_form_cannot_patch_or_delete() {
        let mut form = filled();
        assert_eq!(form.heading(), "Add New Book");
        assert_eq!(form.submit_label(), "Add Book");
        assert_eq!(form.submit_patch(), Err(FormError::NotEditing));
        assert!(!form.request_delete());
        assert_eq!(form.confirm_delete(), None);
    }

    #[test]
    fn delete_needs_confirmation() {
        let item = stored();
        let mut form = ItemForm::edit(&item);
        assert_eq!(form.confirm_delete(), None);

        assert!(form.request_delete());
        assert_eq!(
            form.delete_prompt().unwrap(),
            "Are you sure you want to delete \"A5 exercise book\"? This action cannot be undone."
        );
        form.cancel_delete();
        assert!(form.delete_prompt().is_none());

        form.request_delete();
        assert_eq!(form.confirm_delete(), Some(item.id));
        assert!(!form.is_confirming_delete());
    }

    proptest! {
        #[test]
        fn coerced_price_is_never_negative(text in "\\PC{0,12}") {
            prop_assert!(!coerce_price(&text).is_sign_negative());
        }

        #[test]
        fn numeric_text_round_trips(cents in 0u64..100_000_000) {
            let text = format!("{}.{:02}", cents / 100, cents % 100);
            prop_assert_eq!(coerce_price(&text), Decimal::new(cents as i64, 2));
        }

        #[test]
        fn quantity_takes_leading_digits(n in 0u32..1_000_000, tail in "[a-z ]{0,5}") {
            prop_assert_eq!(coerce_quantity(&format!("{n}{tail}")), n);
        }
    }
}
