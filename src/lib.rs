//! Lending ledger for a school reading room.
//!
//! Loans and returns are appended as immutable movements; balances, item
//! status and open loans are re-derived from a full scan on every read.

pub mod catalog;
pub mod config;
pub mod error;
pub mod movement;
pub mod reconcile;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod utils;

pub use catalog::{CatalogItem, CatalogStore};
pub use crate::config::{LedgerConfig, Session};
pub use error::{LedgerError, Result, ValidationError};
pub use movement::{Borrower, CalendarDate, Category, Movement, MovementDraft, MovementKind};
pub use reconcile::{DataAnomaly, ReconcileReport};
pub use service::{LedgerService, LoanRequest};
pub use snapshot::{Availability, ItemBalance, ItemStatus, LoanPosition, MovementFilter};
pub use store::{MemoryStore, MovementStore, SledStore};
