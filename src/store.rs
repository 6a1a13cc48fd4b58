//! Movement and catalog persistence
//!
//! `SledStore` is the durable store: movements live in their own tree keyed by
//! big-endian id, and every write that needs a fresh id runs in a transaction
//! with the id counter so ids stay unique and monotonic. `MemoryStore` keeps the
//! same contract in process.
use super::catalog::{CatalogItem, CatalogStore};
use super::error::{LedgerError, Result};
use super::movement::{LoanLink, Movement, MovementDraft, TimeStamp};
use super::reconcile::{LinkAction, ReconcilePlan};
use super::utils::{id_to_key, key_to_id};
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const NEXT_ID_KEY: &[u8] = b"next_movement_id";

pub trait MovementStore: Send + Sync {
    /// Appends a validated draft and returns the stored record.
    fn append(&self, draft: &MovementDraft) -> Result<Movement>;
    /// Sets `loan_id` on a record. Succeeds without writing if the same link is
    /// already in place; a different existing link is an error. The `SelfLink`
    /// and `Link` actions of `apply_reconciliation` go through the same rule.
    fn update_loan_link(&self, movement_id: u64, loan_id: u64) -> Result<()>;
    fn get(&self, movement_id: u64) -> Result<Option<Movement>>;
    fn scan_all(&self) -> Result<Vec<Movement>>;
    /// Applies every action of the plan or none of them. Returns ids of the
    /// records created by splits.
    fn apply_reconciliation(&self, plan: &ReconcilePlan) -> Result<Vec<u64>>;
}

/// The exactly-once link rule. `None` means the link is already in place.
fn linked(movement: &Movement, target: &Movement) -> Result<Option<Movement>> {
    if !target.is_loan() {
        return Err(LedgerError::NotALoan(target.id));
    }
    if movement.is_loan() && movement.id != target.id {
        return Err(LedgerError::NotAReturn(movement.id));
    }
    if movement.item_key != target.item_key {
        return Err(LedgerError::ItemMismatch {
            movement_id: movement.id,
            loan_id: target.id,
        });
    }
    match movement.loan_id {
        Some(existing) if existing == target.id => Ok(None),
        Some(existing) => Err(LedgerError::LinkAlreadySet {
            movement_id: movement.id,
            existing,
        }),
        None => Ok(Some(Movement {
            loan_id: Some(target.id),
            ..movement.clone()
        })),
    }
}

fn check_splittable(original: &Movement) -> Result<()> {
    if !original.is_return() {
        return Err(LedgerError::NotAReturn(original.id));
    }
    if let Some(existing) = original.loan_id {
        return Err(LedgerError::LinkAlreadySet {
            movement_id: original.id,
            existing,
        });
    }
    Ok(())
}

fn abort<T, E: Into<LedgerError>>(err: E) -> ConflictableTransactionResult<T, LedgerError> {
    Err(ConflictableTransactionError::Abort(err.into()))
}

fn read(tree: &TransactionalTree, id: u64) -> ConflictableTransactionResult<Movement, LedgerError> {
    let Some(bytes) = tree.get(id_to_key(id))? else {
        return abort(LedgerError::UnknownMovement(id));
    };
    minicbor::decode(&bytes).or_else(abort)
}

fn write(
    tree: &TransactionalTree,
    movement: &Movement,
) -> ConflictableTransactionResult<(), LedgerError> {
    let bytes = minicbor::to_vec(movement).or_else(abort)?;
    tree.insert(&id_to_key(movement.id)[..], bytes)?;
    Ok(())
}

fn link_in(
    movements: &TransactionalTree,
    movement_id: u64,
    loan_id: u64,
) -> ConflictableTransactionResult<(), LedgerError> {
    let movement = read(movements, movement_id)?;
    let target = read(movements, loan_id)?;
    if let Some(updated) = linked(&movement, &target).or_else(abort)? {
        write(movements, &updated)?;
    }
    Ok(())
}

fn next_id(meta: &TransactionalTree) -> ConflictableTransactionResult<u64, LedgerError> {
    let next = match meta.get(NEXT_ID_KEY)? {
        Some(bytes) => match key_to_id(&bytes) {
            Some(id) => id,
            None => return abort(LedgerError::CorruptCounter),
        },
        None => 1,
    };
    meta.insert(NEXT_ID_KEY, &id_to_key(next + 1)[..])?;
    Ok(next)
}

pub struct SledStore {
    instance: sled::Db,
    movements: sled::Tree,
    catalog: sled::Tree,
    meta: sled::Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening ledger store at: {}", path.display());
        Self::from_db(sled::open(path)?)
    }

    /// A store that is deleted when dropped.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(instance: sled::Db) -> Result<Self> {
        let movements = instance.open_tree("movements")?;
        let catalog = instance.open_tree("catalog")?;
        let meta = instance.open_tree("meta")?;
        Ok(Self {
            instance,
            movements,
            catalog,
            meta,
        })
    }

    /// Persist all pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.instance.flush()?;
        Ok(())
    }
}

impl MovementStore for SledStore {
    fn append(&self, draft: &MovementDraft) -> Result<Movement> {
        draft.validate()?;

        let movement = (&self.movements, &self.meta).transaction(|(movements, meta)| {
            let id = next_id(meta)?;
            let movement = draft.assign(id, TimeStamp::new());
            if let LoanLink::Loan(loan_id) = draft.link {
                let loan = read(movements, loan_id)?;
                let unlinked = Movement {
                    loan_id: None,
                    ..movement.clone()
                };
                linked(&unlinked, &loan).or_else(abort)?;
            }
            write(movements, &movement)?;
            Ok(movement)
        })?;

        debug!(
            id = movement.id,
            kind = ?movement.kind,
            item_key = %movement.item_key,
            "appended movement"
        );
        Ok(movement)
    }

    fn update_loan_link(&self, movement_id: u64, loan_id: u64) -> Result<()> {
        self.movements
            .transaction(|movements| link_in(movements, movement_id, loan_id))?;
        Ok(())
    }

    fn get(&self, movement_id: u64) -> Result<Option<Movement>> {
        match self.movements.get(id_to_key(movement_id))? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_all(&self) -> Result<Vec<Movement>> {
        let mut movements = Vec::new();
        for entry in self.movements.iter() {
            let (_, bytes) = entry?;
            movements.push(minicbor::decode(&bytes)?);
        }
        Ok(movements)
    }

    fn apply_reconciliation(&self, plan: &ReconcilePlan) -> Result<Vec<u64>> {
        let created = (&self.movements, &self.meta).transaction(|(movements, meta)| {
            let mut created = Vec::new();
            for action in &plan.actions {
                match action {
                    LinkAction::SelfLink { loan_id } => link_in(movements, *loan_id, *loan_id)?,
                    LinkAction::Link { return_id, loan_id } => {
                        link_in(movements, *return_id, *loan_id)?
                    }
                    LinkAction::Split { return_id, parts } => {
                        let original = read(movements, *return_id)?;
                        check_splittable(&original).or_else(abort)?;
                        movements.remove(&id_to_key(*return_id)[..])?;
                        for part in parts {
                            let id = next_id(meta)?;
                            let mut piece = original.split_part(id, None, part.quantity);
                            if let Some(loan_id) = part.loan_id {
                                let loan = read(movements, loan_id)?;
                                if let Some(updated) = linked(&piece, &loan).or_else(abort)? {
                                    piece = updated;
                                }
                            }
                            write(movements, &piece)?;
                            created.push(id);
                        }
                    }
                }
            }
            Ok(created)
        })?;
        Ok(created)
    }
}

impl CatalogStore for SledStore {
    fn get(&self, item_key: &str) -> Result<Option<CatalogItem>> {
        match self.catalog.get(item_key.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_all(&self) -> Result<Vec<CatalogItem>> {
        let mut items = Vec::new();
        for entry in self.catalog.iter() {
            let (_, bytes) = entry?;
            items.push(minicbor::decode(&bytes)?);
        }
        Ok(items)
    }

    fn put(&self, item: CatalogItem) -> Result<()> {
        let bytes = minicbor::to_vec(&item)?;
        self.catalog.insert(item.item_key.as_bytes(), bytes)?;
        Ok(())
    }

    fn remove(&self, item_key: &str) -> Result<bool> {
        Ok(self.catalog.remove(item_key.as_bytes())?.is_some())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    movements: BTreeMap<u64, Movement>,
    catalog: BTreeMap<String, CatalogItem>,
    next_id: u64,
}

impl MemoryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
    fn movement(&self, id: u64) -> Result<&Movement> {
        self.movements
            .get(&id)
            .ok_or(LedgerError::UnknownMovement(id))
    }
    fn link(&mut self, movement_id: u64, loan_id: u64) -> Result<()> {
        let movement = self.movement(movement_id)?;
        let target = self.movement(loan_id)?;
        if let Some(updated) = linked(movement, target)? {
            self.movements.insert(movement_id, updated);
        }
        Ok(())
    }
}

/// In-process store with the same contract as [`SledStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MovementStore for MemoryStore {
    fn append(&self, draft: &MovementDraft) -> Result<Movement> {
        draft.validate()?;
        let mut state = self.state();

        let id = state.next_id + 1;
        let movement = draft.assign(id, TimeStamp::new());
        if let LoanLink::Loan(loan_id) = draft.link {
            let loan = state.movement(loan_id)?;
            let unlinked = Movement {
                loan_id: None,
                ..movement.clone()
            };
            linked(&unlinked, loan)?;
        }
        state.next_id = id;
        state.movements.insert(id, movement.clone());
        Ok(movement)
    }

    fn update_loan_link(&self, movement_id: u64, loan_id: u64) -> Result<()> {
        self.state().link(movement_id, loan_id)
    }

    fn get(&self, movement_id: u64) -> Result<Option<Movement>> {
        Ok(self.state().movements.get(&movement_id).cloned())
    }

    fn scan_all(&self) -> Result<Vec<Movement>> {
        Ok(self.state().movements.values().cloned().collect())
    }

    fn apply_reconciliation(&self, plan: &ReconcilePlan) -> Result<Vec<u64>> {
        let mut state = self.state();
        // work on a copy so a failed action leaves the store untouched
        let mut staged = MemoryState {
            movements: state.movements.clone(),
            catalog: BTreeMap::new(),
            next_id: state.next_id,
        };

        let mut created = Vec::new();
        for action in &plan.actions {
            match action {
                LinkAction::SelfLink { loan_id } => staged.link(*loan_id, *loan_id)?,
                LinkAction::Link { return_id, loan_id } => staged.link(*return_id, *loan_id)?,
                LinkAction::Split { return_id, parts } => {
                    let original = staged.movement(*return_id)?.clone();
                    check_splittable(&original)?;
                    staged.movements.remove(return_id);
                    for part in parts {
                        let id = staged.next_id();
                        staged
                            .movements
                            .insert(id, original.split_part(id, None, part.quantity));
                        if let Some(loan_id) = part.loan_id {
                            staged.link(id, loan_id)?;
                        }
                        created.push(id);
                    }
                }
            }
        }

        state.movements = staged.movements;
        state.next_id = staged.next_id;
        Ok(created)
    }
}

impl CatalogStore for MemoryStore {
    fn get(&self, item_key: &str) -> Result<Option<CatalogItem>> {
        Ok(self.state().catalog.get(item_key).cloned())
    }

    fn scan_all(&self) -> Result<Vec<CatalogItem>> {
        Ok(self.state().catalog.values().cloned().collect())
    }

    fn put(&self, item: CatalogItem) -> Result<()> {
        self.state().catalog.insert(item.item_key.clone(), item);
        Ok(())
    }

    fn remove(&self, item_key: &str) -> Result<bool> {
        Ok(self.state().catalog.remove(item_key).is_some())
    }
}
