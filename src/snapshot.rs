//! State derived from one scan of the movement store. Nothing here is stored.
use super::catalog::CatalogItem;
use super::movement::{Borrower, CalendarDate, Category, Movement, MovementKind, TimeStamp};
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemBalance {
    pub item_key: String,
    pub total_stock: u32,
    pub on_loan: u32,
    pub available: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    OnLoan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStatus {
    pub item_key: String,
    pub category: Category,
    pub status: Availability,
    // taken from the item's latest movement, if any
    pub borrower: Option<Borrower>,
    pub due_on: Option<CalendarDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanPosition {
    pub loan_id: u64,
    pub item_key: String,
    pub category: Category,
    pub borrower: Borrower,
    pub occurred_at: TimeStamp<Utc>,
    pub due_on: Option<CalendarDate>,
    pub quantity_loaned: u32,
    pub quantity_returned: u32,
    pub quantity_pending: u32,
    pub overdue: bool,
}

/// Filters for browsing the movement history. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    borrower_contains: Option<String>,
    item_contains: Option<String>,
    kind: Option<MovementKind>,
    from: Option<CalendarDate>,
    to: Option<CalendarDate>,
}

impl MovementFilter {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn borrower_contains(mut self, needle: impl Into<String>) -> Self {
        self.borrower_contains = Some(needle.into());
        self
    }
    pub fn item_contains(mut self, needle: impl Into<String>) -> Self {
        self.item_contains = Some(needle.into());
        self
    }
    pub fn kind(mut self, kind: MovementKind) -> Self {
        self.kind = Some(kind);
        self
    }
    /// Inclusive on both ends, compared on the calendar day of `occurred_at`.
    pub fn period(mut self, from: CalendarDate, to: CalendarDate) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }
    pub fn matches(&self, movement: &Movement) -> bool {
        if let Some(needle) = &self.borrower_contains {
            if !movement.borrower.name_contains(needle) {
                return false;
            }
        }
        if let Some(needle) = &self.item_contains {
            if !movement
                .item_key
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if self.kind.is_some_and(|kind| kind != movement.kind) {
            return false;
        }
        let day = movement.occurred_at.date();
        if self.from.is_some_and(|from| day < from) || self.to.is_some_and(|to| day > to) {
            return false;
        }
        true
    }
}

pub struct LedgerSnapshot {
    movements: Vec<Movement>, // chronological
}

impl LedgerSnapshot {
    pub fn new(mut movements: Vec<Movement>) -> Self {
        movements.sort_by_key(|m| m.chronological_key());
        Self { movements }
    }

    pub fn movements(&self) -> &[Movement] {
        &self.movements
    }

    pub fn len(&self) -> usize {
        self.movements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movements.is_empty()
    }

    fn signed_totals(&self) -> HashMap<&str, i64> {
        let mut totals: HashMap<&str, i64> = HashMap::new();
        for m in &self.movements {
            let signed = match m.kind {
                MovementKind::Loan => i64::from(m.quantity),
                MovementKind::Return => -i64::from(m.quantity),
            };
            *totals.entry(m.item_key.as_str()).or_default() += signed;
        }
        totals
    }

    fn balance_from(item: &CatalogItem, signed: i64) -> ItemBalance {
        let on_loan = signed.clamp(0, i64::from(item.total_stock)) as u32;
        ItemBalance {
            item_key: item.item_key.clone(),
            total_stock: item.total_stock,
            on_loan,
            available: item.total_stock - on_loan,
        }
    }

    pub fn balance(&self, item: &CatalogItem) -> ItemBalance {
        let signed = self.signed_totals().get(item.item_key.as_str()).copied();
        Self::balance_from(item, signed.unwrap_or(0))
    }

    /// One row per catalog item, ordered by item key.
    pub fn balances(&self, catalog: &[CatalogItem]) -> Vec<ItemBalance> {
        let totals = self.signed_totals();
        let mut balances: Vec<ItemBalance> = catalog
            .iter()
            .map(|item| {
                let signed = totals.get(item.item_key.as_str()).copied().unwrap_or(0);
                Self::balance_from(item, signed)
            })
            .collect();
        balances.sort_by(|a, b| a.item_key.cmp(&b.item_key));
        balances
    }

    fn latest_by_item(&self) -> HashMap<&str, &Movement> {
        // later entries overwrite earlier ones
        self.movements
            .iter()
            .map(|m| (m.item_key.as_str(), m))
            .collect()
    }

    fn status_from(item: &CatalogItem, latest: Option<&Movement>) -> ItemStatus {
        let status = match latest {
            Some(m) if m.is_loan() => Availability::OnLoan,
            _ => Availability::Available,
        };
        ItemStatus {
            item_key: item.item_key.clone(),
            category: item.category,
            status,
            borrower: latest.map(|m| m.borrower.clone()),
            due_on: latest.and_then(|m| m.due_on),
        }
    }

    pub fn status(&self, item: &CatalogItem) -> ItemStatus {
        let latest = self
            .movements
            .iter()
            .rev()
            .find(|m| m.item_key == item.item_key);
        Self::status_from(item, latest)
    }

    pub fn statuses(&self, catalog: &[CatalogItem]) -> Vec<ItemStatus> {
        let latest = self.latest_by_item();
        let mut statuses: Vec<ItemStatus> = catalog
            .iter()
            .map(|item| Self::status_from(item, latest.get(item.item_key.as_str()).copied()))
            .collect();
        statuses.sort_by(|a, b| a.item_key.cmp(&b.item_key));
        statuses
    }

    fn returned_by_loan(&self) -> HashMap<u64, u32> {
        let mut returned: HashMap<u64, u32> = HashMap::new();
        for m in self.movements.iter().filter(|m| m.is_return()) {
            if let Some(loan_id) = m.loan_id {
                let entry = returned.entry(loan_id).or_default();
                *entry = entry.saturating_add(m.quantity);
            }
        }
        returned
    }

    /// Units still pending on the item's loans. Unlinked returns do not close
    /// any loan, so this can exceed the balance's `on_loan`.
    pub fn pending_for_item(&self, item_key: &str) -> u32 {
        let returned = self.returned_by_loan();
        self.movements
            .iter()
            .filter(|m| m.is_loan() && m.item_key == item_key)
            .map(|loan| {
                let back = returned.get(&loan.id).copied().unwrap_or(0);
                loan.quantity.saturating_sub(back)
            })
            .fold(0, u32::saturating_add)
    }

    fn position_from(loan: &Movement, returned: u32, today: CalendarDate) -> LoanPosition {
        let quantity_pending = loan.quantity.saturating_sub(returned);
        LoanPosition {
            loan_id: loan.id,
            item_key: loan.item_key.clone(),
            category: loan.category,
            borrower: loan.borrower.clone(),
            occurred_at: loan.occurred_at.clone(),
            due_on: loan.due_on,
            quantity_loaned: loan.quantity,
            quantity_returned: returned,
            quantity_pending,
            overdue: quantity_pending > 0 && loan.due_on.is_some_and(|due| due < today),
        }
    }

    /// Every loan, open or closed, in chronological order.
    pub fn positions(&self, today: CalendarDate) -> Vec<LoanPosition> {
        let returned = self.returned_by_loan();
        self.movements
            .iter()
            .filter(|m| m.is_loan())
            .map(|loan| {
                let back = returned.get(&loan.id).copied().unwrap_or(0);
                Self::position_from(loan, back, today)
            })
            .collect()
    }

    pub fn position(&self, loan_id: u64, today: CalendarDate) -> Option<LoanPosition> {
        let loan = self
            .movements
            .iter()
            .find(|m| m.id == loan_id && m.is_loan())?;
        let returned = self
            .movements
            .iter()
            .filter(|m| m.is_return() && m.loan_id == Some(loan_id))
            .fold(0u32, |acc, m| acc.saturating_add(m.quantity));
        Some(Self::position_from(loan, returned, today))
    }

    /// Open loans: overdue first, then soonest due, then oldest.
    pub fn pending(&self, today: CalendarDate) -> Vec<LoanPosition> {
        let mut pending: Vec<LoanPosition> = self
            .positions(today)
            .into_iter()
            .filter(|p| p.quantity_pending > 0)
            .collect();
        pending.sort_by(pending_order);
        pending
    }

    /// Matching movements, newest first.
    pub fn history(&self, filter: &MovementFilter) -> Vec<Movement> {
        self.movements
            .iter()
            .rev()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect()
    }
}

fn pending_order(a: &LoanPosition, b: &LoanPosition) -> Ordering {
    // undated loans sort after every dated one
    let due = |p: &LoanPosition| (p.due_on.is_none(), p.due_on);
    b.overdue
        .cmp(&a.overdue)
        .then_with(|| due(a).cmp(&due(b)))
        .then_with(|| a.occurred_at.cmp(&b.occurred_at))
        .then_with(|| a.loan_id.cmp(&b.loan_id))
}
