//! Catalog reference data and the store contract the ledger reads it through
use super::error::{Result, ValidationError};
use super::movement::Category;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct CatalogItem {
    #[n(0)]
    pub item_key: String,
    #[n(1)]
    pub category: Category,
    #[n(2)]
    pub total_stock: u32,
}

impl CatalogItem {
    pub fn new(
        item_key: &str,
        category: Category,
        total_stock: u32,
    ) -> std::result::Result<Self, ValidationError> {
        let item_key = item_key.trim();
        if item_key.is_empty() {
            return Err(ValidationError::EmptyItemKey);
        }
        Ok(Self {
            item_key: item_key.to_string(),
            category,
            total_stock,
        })
    }
}

/// Durable item records with total-stock counts.
pub trait CatalogStore: Send + Sync {
    fn get(&self, item_key: &str) -> Result<Option<CatalogItem>>;
    fn scan_all(&self) -> Result<Vec<CatalogItem>>;
    fn put(&self, item: CatalogItem) -> Result<()>;
    /// Returns whether an entry was removed.
    fn remove(&self, item_key: &str) -> Result<bool>;
}
