//! Sample collection shown when the data service cannot be reached.

use rust_decimal::Decimal;
use uuid::Uuid;

use stockbook_core::RecordId;
use stockbook_inventory::{Item, ItemId};

struct Sample {
    id: u128,
    title: &'static str,
    purchase_cents: i64,
    selling_cents: i64,
    quantity: u32,
    category: &'static str,
    supplier: &'static str,
    date_added: &'static str,
}

// Newest first.
const SAMPLES: &[Sample] = &[
    Sample {
        id: 0x0193_3f2a_8c00_7000_8000_0000_0000_0001,
        title: "A4 CR book 160 pages",
        purchase_cents: 18000,
        selling_cents: 22000,
        quantity: 24,
        category: "cr-books",
        supplier: "Atlas",
        date_added: "2024-11-20T09:15:00Z",
    },
    Sample {
        id: 0x0193_3f2a_8c00_7000_8000_0000_0000_0002,
        title: "Blue ballpoint pen (box of 20)",
        purchase_cents: 30000,
        selling_cents: 36000,
        quantity: 8,
        category: "ballpoint-pens",
        supplier: "Nova",
        date_added: "2024-11-18T14:40:00Z",
    },
    Sample {
        id: 0x0193_3f2a_8c00_7000_8000_0000_0000_0003,
        title: "Square ruled exercise book 80 pages",
        purchase_cents: 9000,
        selling_cents: 11500,
        quantity: 40,
        category: "square-ruled-books",
        supplier: "Promate",
        date_added: "2024-11-15T08:05:00Z",
    },
    Sample {
        id: 0x0193_3f2a_8c00_7000_8000_0000_0000_0004,
        title: "HB pencil",
        purchase_cents: 1500,
        selling_cents: 2500,
        quantity: 3,
        category: "pencils",
        supplier: "Atlas",
        date_added: "2024-11-10T11:30:00Z",
    },
    Sample {
        id: 0x0193_3f2a_8c00_7000_8000_0000_0000_0005,
        title: "Geometry box",
        purchase_cents: 35000,
        selling_cents: 45000,
        quantity: 6,
        category: "mathematical-instruments",
        supplier: "Maped",
        date_added: "2024-11-02T16:00:00Z",
    },
];

/// The fixed sample items, newest first.
pub fn fallback_items() -> Vec<Item> {
    SAMPLES
        .iter()
        .map(|s| Item {
            id: ItemId::new(RecordId::from_uuid(Uuid::from_u128(s.id))),
            title: s.title.to_string(),
            purchase_price: Decimal::new(s.purchase_cents, 2),
            selling_price: Decimal::new(s.selling_cents, 2),
            quantity: s.quantity,
            category: s.category.to_string(),
            supplier: s.supplier.to_string(),
            date_added: Some(s.date_added.to_string()),
            image_url: None,
        })
        .collect()
}
