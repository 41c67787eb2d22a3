//! Reference data consumed by the engine.
//!
//! Identity is immutable; descriptive attributes are maintained elsewhere.

use serde::{Deserialize, Serialize};

use stockroom_core::{
    CounterpartyId, Entity, LocationId, PackingProfileId, ProductId, Qty,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub barcode_ean: String,
    pub unit: String,
    pub is_active: bool,
}

impl Product {
    pub fn new(sku: impl Into<String>, name: impl Into<String>, barcode_ean: impl Into<String>) -> Self {
        Self {
            id: ProductId::new(),
            sku: sku.into(),
            name: name.into(),
            barcode_ean: barcode_ean.into(),
            unit: "pcs".to_string(),
            is_active: true,
        }
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// A storage cell, addressed by its unique `cell_code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub warehouse: String,
    pub zone: Option<String>,
    pub cell_code: String,
}

impl Location {
    pub fn new(warehouse: impl Into<String>, zone: Option<&str>, cell_code: impl Into<String>) -> Self {
        Self {
            id: LocationId::new(),
            warehouse: warehouse.into(),
            zone: zone.map(str::to_string),
            cell_code: cell_code.into(),
        }
    }
}

impl Entity for Location {
    type Id = LocationId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Supplier or customer a document may reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparty {
    pub id: CounterpartyId,
    pub name: String,
    pub is_active: bool,
}

impl Counterparty {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CounterpartyId::new(),
            name: name.into(),
            is_active: true,
        }
    }
}

impl Entity for Counterparty {
    type Id = CounterpartyId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// How many units of a product one pack of a given type holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackingProfile {
    pub id: PackingProfileId,
    pub product_id: ProductId,
    pub pack_type: String,
    pub qty_per_pack: Qty,
    pub is_active: bool,
}

impl PackingProfile {
    pub fn new(product_id: ProductId, pack_type: impl Into<String>, qty_per_pack: Qty) -> Self {
        Self {
            id: PackingProfileId::new(),
            product_id,
            pack_type: pack_type.into(),
            qty_per_pack,
            is_active: true,
        }
    }

    /// Quantity represented by `pack_count` packs.
    pub fn quantity_for(&self, pack_count: Qty) -> Qty {
        pack_count * self.qty_per_pack
    }
}

impl Entity for PackingProfile {
    type Id = PackingProfileId;

    fn id(&self) -> Self::Id {
        self.id
    }
}
