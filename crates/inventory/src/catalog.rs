use serde::{Deserialize, Serialize};

use stockroom_core::{CategoryId, ItemId, LocationId, TenantId};

/// Catalog item as seen by the stock core (maintained by the CRUD screens).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: ItemId,
    pub tenant_id: TenantId,
    pub name: String,
    pub category_id: Option<CategoryId>,
    pub active: bool,
    /// Where the item is normally stored, if the catalog names one.
    pub home_location_id: Option<LocationId>,
}

impl CatalogItem {
    /// `None` matches every category.
    pub fn matches_category(&self, category_id: Option<CategoryId>) -> bool {
        match category_id {
            None => true,
            Some(wanted) => self.category_id == Some(wanted),
        }
    }
}

/// Storage location (warehouse, shelf, van...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub tenant_id: TenantId,
    pub name: String,
}
