//! Reference-data lookups used by the movement services.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use stockroom_core::{CounterpartyId, EngineError, EngineResult, LocationId, ProductId};
use stockroom_infra::{StoreTx, WarehouseStore};
use stockroom_inventory::{Counterparty, Location, PackingProfile, Product};

use crate::warehouse::Warehouse;

/// A product given either by id or by its EAN barcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductRef {
    Id(ProductId),
    Barcode(String),
}

impl From<ProductId> for ProductRef {
    fn from(id: ProductId) -> Self {
        Self::Id(id)
    }
}

/// A location given either by id or by its cell code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationRef {
    Id(LocationId),
    Cell(String),
}

impl From<LocationId> for LocationRef {
    fn from(id: LocationId) -> Self {
        Self::Id(id)
    }
}

impl LocationRef {
    pub fn cell(code: impl Into<String>) -> Self {
        Self::Cell(code.into())
    }
}

pub(crate) async fn resolve_product<T: StoreTx>(
    tx: &mut T,
    product: Option<&ProductRef>,
) -> EngineResult<Product> {
    let found = match product {
        None => return Err(EngineError::invalid("product_id or barcode is required")),
        Some(ProductRef::Id(id)) => tx.product(*id).await?,
        Some(ProductRef::Barcode(code)) => tx.product_by_barcode(code).await?,
    };
    found.ok_or_else(|| EngineError::not_found("product"))
}

pub(crate) async fn resolve_location<T: StoreTx>(
    tx: &mut T,
    location: Option<&LocationRef>,
) -> EngineResult<Location> {
    let found = match location {
        None => return Err(EngineError::invalid("location_id or cell_code is required")),
        Some(LocationRef::Id(id)) => tx.location(*id).await?,
        Some(LocationRef::Cell(code)) => tx.location_by_cell(code).await?,
    };
    found.ok_or_else(|| EngineError::not_found("location"))
}

/// The work-in-process location named by configuration.
pub(crate) async fn production_location<T: StoreTx>(tx: &mut T, cell_code: &str) -> EngineResult<Location> {
    tx.location_by_cell(cell_code).await?.ok_or_else(|| {
        EngineError::misconfigured(format!("production location {cell_code} not found"))
    })
}

/// `None` stays `None`; a given id must name an active counterparty.
pub(crate) async fn resolve_counterparty<T: StoreTx>(
    tx: &mut T,
    id: Option<CounterpartyId>,
) -> EngineResult<Option<CounterpartyId>> {
    let Some(id) = id else {
        return Ok(None);
    };
    match tx.counterparty(id).await? {
        Some(counterparty) if counterparty.is_active => Ok(Some(id)),
        _ => Err(EngineError::invalid(format!("counterparty {id} is missing or inactive"))),
    }
}

/// Seeding and lookup of reference data.
pub struct Catalog<'a, S> {
    warehouse: &'a Warehouse<S>,
}

impl<'a, S: WarehouseStore> Catalog<'a, S> {
    pub(crate) fn new(warehouse: &'a Warehouse<S>) -> Self {
        Self { warehouse }
    }

    #[instrument(skip(self, product), fields(sku = %product.sku), err)]
    pub async fn upsert_product(&self, product: &Product) -> EngineResult<()> {
        let mut tx = self.warehouse.begin().await?;
        tx.upsert_product(product).await?;
        self.warehouse.commit(tx, Vec::new()).await
    }

    #[instrument(skip(self, location), fields(cell = %location.cell_code), err)]
    pub async fn upsert_location(&self, location: &Location) -> EngineResult<()> {
        let mut tx = self.warehouse.begin().await?;
        tx.upsert_location(location).await?;
        self.warehouse.commit(tx, Vec::new()).await
    }

    pub async fn upsert_counterparty(&self, counterparty: &Counterparty) -> EngineResult<()> {
        let mut tx = self.warehouse.begin().await?;
        tx.upsert_counterparty(counterparty).await?;
        self.warehouse.commit(tx, Vec::new()).await
    }

    pub async fn upsert_packing_profile(&self, profile: &PackingProfile) -> EngineResult<()> {
        let mut tx = self.warehouse.begin().await?;
        if tx.product(profile.product_id).await?.is_none() {
            return Err(EngineError::not_found("product"));
        }
        tx.upsert_packing_profile(profile).await?;
        self.warehouse.commit(tx, Vec::new()).await
    }

    pub async fn product(&self, product: &ProductRef) -> EngineResult<Product> {
        let mut tx = self.warehouse.begin().await?;
        let found = resolve_product(&mut tx, Some(product)).await?;
        self.warehouse.finish_read(tx).await?;
        Ok(found)
    }

    pub async fn location(&self, location: &LocationRef) -> EngineResult<Location> {
        let mut tx = self.warehouse.begin().await?;
        let found = resolve_location(&mut tx, Some(location)).await?;
        self.warehouse.finish_read(tx).await?;
        Ok(found)
    }
}
