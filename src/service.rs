//! Service layer API for lending operations
use super::catalog::{CatalogItem, CatalogStore};
use super::config::{LedgerConfig, Session};
use super::error::{LedgerError, Result, ValidationError};
use super::movement::{Borrower, CalendarDate, LoanLink, Movement, MovementDraft};
use super::reconcile::{self, ReconcileReport};
use super::snapshot::{ItemBalance, ItemStatus, LedgerSnapshot, LoanPosition, MovementFilter};
use super::store::{MovementStore, SledStore};
use super::utils::ledger_digest;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// What the desk asks for when lending an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanRequest {
    pub item_key: String,
    pub quantity: u32,
    pub borrower: Borrower,
    pub due_on: Option<CalendarDate>, // None falls back to the session's loan period
    pub notes: String,
}

impl LoanRequest {
    pub fn new(item_key: impl Into<String>, quantity: u32, borrower: Borrower) -> Self {
        Self {
            item_key: item_key.into(),
            quantity,
            borrower,
            due_on: None,
            notes: String::new(),
        }
    }
    pub fn set_due_on(mut self, due_on: CalendarDate) -> Self {
        self.due_on = Some(due_on);
        self
    }
    pub fn set_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

pub struct LedgerService {
    movements: Arc<dyn MovementStore>,
    catalog: Arc<dyn CatalogStore>,
    // serialises check-then-append so validation and write see the same ledger
    write_lock: Mutex<()>,
}

impl LedgerService {
    pub fn new(movements: Arc<dyn MovementStore>, catalog: Arc<dyn CatalogStore>) -> Self {
        Self {
            movements,
            catalog,
            write_lock: Mutex::new(()),
        }
    }

    /// Service over one store holding both movements and catalog.
    pub fn with_store<S: MovementStore + CatalogStore + 'static>(store: Arc<S>) -> Self {
        Self::new(store.clone(), store)
    }

    /// Open the sled store named by the config, reconciling legacy data first if enabled.
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        config.validate()?;
        let service = Self::with_store(Arc::new(SledStore::open(&config.db_path)?));
        if config.reconcile_on_startup {
            service.reconcile()?;
        }
        Ok(service)
    }

    fn writer(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// One full scan; every read below derives from a single snapshot.
    fn snapshot(&self) -> Result<LedgerSnapshot> {
        let snapshot = LedgerSnapshot::new(self.movements.scan_all()?);
        debug!(movements = snapshot.len(), "scanned ledger");
        Ok(snapshot)
    }

    fn catalog_item(&self, item_key: &str) -> Result<CatalogItem> {
        self.catalog
            .get(item_key)?
            .ok_or_else(|| LedgerError::UnknownItem(item_key.to_string()))
    }

    /// Units an item still has out: the clamped balance, or the pending
    /// quantity of its loans when unlinked returns hide them from the balance.
    fn units_in_use(snapshot: &LedgerSnapshot, item: &CatalogItem) -> u32 {
        let on_loan = snapshot.balance(item).on_loan;
        on_loan.max(snapshot.pending_for_item(&item.item_key))
    }

    /// Lend `request.quantity` units. Returns the new loan's id, which is also its loan id.
    pub fn append_loan(&self, request: LoanRequest, session: &Session) -> Result<u64> {
        if request.quantity == 0 {
            return Err(ValidationError::ZeroQuantity.into());
        }
        let _guard = self.writer();

        let item = self.catalog_item(&request.item_key)?;
        let balance = self.snapshot()?.balance(&item);
        if balance.available < request.quantity {
            warn!(
                item_key = %item.item_key,
                requested = request.quantity,
                available = balance.available,
                "loan rejected"
            );
            return Err(LedgerError::InsufficientStock {
                item_key: item.item_key,
                requested: request.quantity,
                available: balance.available,
            });
        }

        let due_on = match request.due_on {
            Some(due_on) => due_on,
            None => CalendarDate::today()
                .add_days(session.default_loan_days)
                .ok_or_else(|| ValidationError::InvalidConfig {
                    field: "default_loan_days",
                    value: session.default_loan_days.to_string(),
                })?,
        };

        let draft = MovementDraft::loan(item.item_key.clone(), request.quantity, request.borrower)
            .set_category(item.category)
            .set_due_on(due_on)
            .set_operator(session.operator.clone())
            .set_notes(request.notes);
        let loan = self.movements.append(&draft)?;

        info!(
            loan_id = loan.id,
            item_key = %loan.item_key,
            quantity = loan.quantity,
            due_on = %due_on,
            operator = %loan.operator,
            "loan recorded"
        );
        Ok(loan.id)
    }

    /// Return `quantity` units against an open loan. Returns the new movement's id.
    pub fn append_return(
        &self,
        loan_id: u64,
        quantity: u32,
        notes: &str,
        session: &Session,
    ) -> Result<u64> {
        if quantity == 0 {
            return Err(ValidationError::ZeroQuantity.into());
        }
        let _guard = self.writer();

        let position = self
            .snapshot()?
            .position(loan_id, CalendarDate::today())
            .ok_or(LedgerError::UnknownLoan(loan_id))?;
        if quantity > position.quantity_pending {
            warn!(
                loan_id,
                requested = quantity,
                pending = position.quantity_pending,
                "return rejected"
            );
            return Err(LedgerError::OverReturn {
                loan_id,
                requested: quantity,
                pending: position.quantity_pending,
            });
        }

        let draft = MovementDraft::return_of(position.item_key, quantity, position.borrower)
            .set_category(position.category)
            .set_link(LoanLink::Loan(loan_id))
            .set_operator(session.operator.clone())
            .set_notes(notes);
        let ret = self.movements.append(&draft)?;

        info!(
            movement_id = ret.id,
            loan_id,
            quantity,
            pending = position.quantity_pending - quantity,
            operator = %ret.operator,
            "return recorded"
        );
        Ok(ret.id)
    }

    pub fn balances(&self) -> Result<Vec<ItemBalance>> {
        let catalog = self.catalog.scan_all()?;
        Ok(self.snapshot()?.balances(&catalog))
    }

    pub fn balance(&self, item_key: &str) -> Result<ItemBalance> {
        let item = self.catalog_item(item_key)?;
        Ok(self.snapshot()?.balance(&item))
    }

    pub fn available(&self, item_key: &str) -> Result<u32> {
        Ok(self.balance(item_key)?.available)
    }

    pub fn status(&self, item_key: &str) -> Result<ItemStatus> {
        let item = self.catalog_item(item_key)?;
        Ok(self.snapshot()?.status(&item))
    }

    pub fn statuses(&self) -> Result<Vec<ItemStatus>> {
        let catalog = self.catalog.scan_all()?;
        Ok(self.snapshot()?.statuses(&catalog))
    }

    /// Open loans as of `today`, riskiest first.
    pub fn pending_loans(&self, today: CalendarDate) -> Result<Vec<LoanPosition>> {
        Ok(self.snapshot()?.pending(today))
    }

    pub fn loan_position(&self, loan_id: u64, today: CalendarDate) -> Result<LoanPosition> {
        self.snapshot()?
            .position(loan_id, today)
            .ok_or(LedgerError::UnknownLoan(loan_id))
    }

    pub fn history(&self, filter: &MovementFilter) -> Result<Vec<Movement>> {
        Ok(self.snapshot()?.history(filter))
    }

    pub fn catalog(&self) -> Result<Vec<CatalogItem>> {
        let mut items = self.catalog.scan_all()?;
        items.sort_by(|a, b| a.item_key.cmp(&b.item_key));
        Ok(items)
    }

    /// Add or edit a catalog item. Lowering the stock of an item with units on
    /// loan is refused.
    pub fn upsert_item(&self, item: CatalogItem) -> Result<()> {
        let _guard = self.writer();

        if let Some(existing) = self.catalog.get(&item.item_key)? {
            if item.total_stock < existing.total_stock {
                let on_loan = Self::units_in_use(&self.snapshot()?, &existing);
                if on_loan > 0 {
                    warn!(item_key = %item.item_key, on_loan, "stock reduction rejected");
                    return Err(LedgerError::ItemInUse {
                        item_key: item.item_key,
                        on_loan,
                    });
                }
            }
        }

        info!(item_key = %item.item_key, total_stock = item.total_stock, "catalog item saved");
        self.catalog.put(item)
    }

    pub fn remove_item(&self, item_key: &str) -> Result<()> {
        let _guard = self.writer();

        let item = self.catalog_item(item_key)?;
        let on_loan = Self::units_in_use(&self.snapshot()?, &item);
        if on_loan > 0 {
            warn!(item_key, on_loan, "catalog removal rejected");
            return Err(LedgerError::ItemInUse {
                item_key: item.item_key,
                on_loan,
            });
        }

        self.catalog.remove(item_key)?;
        info!(item_key, "catalog item removed");
        Ok(())
    }

    /// Link legacy records. Holds the write lock for the whole pass.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let _guard = self.writer();
        reconcile::reconcile(self.movements.as_ref())
    }

    /// SHA-256 over all movements in id order.
    pub fn digest(&self) -> Result<String> {
        ledger_digest(&self.movements.scan_all()?)
    }
}
