//! Linking pass for ledgers written before returns carried a loan id
//!
//! Early ledgers recorded returns without saying which loan they closed. This
//! job gives every loan its own identity and then drains the unlinked returns,
//! grouped by item and borrower, against that group's loans oldest-first. A
//! return spread over several loans is replaced by one linked record per loan.
//! Returns nothing can absorb stay unlinked and are reported as anomalies; they
//! still count toward item balances.
//!
//! Planning is pure and the plan is applied by the store in one atomic step, so
//! the job is safe to run on every start: an already linked ledger plans nothing.
use super::error::Result;
use super::movement::{Borrower, Movement};
use super::store::MovementStore;
use super::utils::ledger_digest;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPart {
    pub loan_id: Option<u64>, // None keeps the residual unlinked
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    SelfLink {
        loan_id: u64,
    },
    Link {
        return_id: u64,
        loan_id: u64,
    },
    Split {
        return_id: u64,
        parts: Vec<SplitPart>,
    },
}

/// A legacy return, or part of one, that matched no open loan.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "return {return_id} of '{item_key}' by {borrower}: {unmatched} unit(s) matched no open loan"
)]
pub struct DataAnomaly {
    pub return_id: u64,
    pub item_key: String,
    pub borrower: String,
    pub unmatched: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub actions: Vec<LinkAction>,
    pub anomalies: Vec<DataAnomaly>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub self_linked: usize,
    pub linked_in_place: usize,
    pub split_returns: usize,
    pub records_created: usize,
    pub anomalies: Vec<DataAnomaly>,
    pub digest: String, // ledger digest after the run
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
    fn report(&self) -> ReconcileReport {
        let mut report = ReconcileReport {
            anomalies: self.anomalies.clone(),
            ..ReconcileReport::default()
        };
        for action in &self.actions {
            match action {
                LinkAction::SelfLink { .. } => report.self_linked += 1,
                LinkAction::Link { .. } => report.linked_in_place += 1,
                LinkAction::Split { .. } => report.split_returns += 1,
            }
        }
        report
    }
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.self_linked == 0 && self.linked_in_place == 0 && self.split_returns == 0
    }
}

type MatchKey = (String, Borrower);

struct OpenLoan {
    id: u64,
    at: (DateTime<Utc>, u64),
    remaining: u32,
}

/// Works out which links to write; reads nothing but `movements`.
pub fn plan(movements: &[Movement]) -> ReconcilePlan {
    let mut ordered: Vec<&Movement> = movements.iter().collect();
    ordered.sort_by_key(|m| m.chronological_key());

    let mut already_returned: HashMap<u64, u32> = HashMap::new();
    for ret in ordered.iter().filter(|m| m.is_return()) {
        if let Some(loan_id) = ret.loan_id {
            let entry = already_returned.entry(loan_id).or_default();
            *entry = entry.saturating_add(ret.quantity);
        }
    }

    let mut actions = Vec::new();
    let mut queues: HashMap<MatchKey, Vec<OpenLoan>> = HashMap::new();
    for loan in ordered.iter().filter(|m| m.is_loan()) {
        if loan.loan_id.is_none() {
            actions.push(LinkAction::SelfLink { loan_id: loan.id });
        }
        let returned = already_returned.get(&loan.id).copied().unwrap_or(0);
        queues
            .entry((loan.item_key.clone(), loan.borrower.clone()))
            .or_default()
            .push(OpenLoan {
                id: loan.id,
                at: loan.chronological_key(),
                remaining: loan.quantity.saturating_sub(returned),
            });
    }

    let mut anomalies = Vec::new();
    for ret in ordered
        .iter()
        .filter(|m| m.is_return() && m.loan_id.is_none())
    {
        let returned_at = ret.chronological_key();
        let mut outstanding = ret.quantity;
        let mut consumed: Vec<(u64, u32)> = Vec::new();

        if let Some(queue) = queues.get_mut(&(ret.item_key.clone(), ret.borrower.clone())) {
            // a return never closes a loan made after it
            for loan in queue.iter_mut().take_while(|l| l.at <= returned_at) {
                if outstanding == 0 {
                    break;
                }
                if loan.remaining == 0 {
                    continue;
                }
                let take = loan.remaining.min(outstanding);
                loan.remaining -= take;
                outstanding -= take;
                consumed.push((loan.id, take));
            }
        }

        if outstanding > 0 {
            anomalies.push(DataAnomaly {
                return_id: ret.id,
                item_key: ret.item_key.clone(),
                borrower: ret.borrower.display_name(),
                unmatched: outstanding,
            });
        }

        match consumed.as_slice() {
            [] => {}
            [(loan_id, _)] if outstanding == 0 => actions.push(LinkAction::Link {
                return_id: ret.id,
                loan_id: *loan_id,
            }),
            _ => {
                let mut parts: Vec<SplitPart> = consumed
                    .iter()
                    .map(|&(loan_id, quantity)| SplitPart {
                        loan_id: Some(loan_id),
                        quantity,
                    })
                    .collect();
                if outstanding > 0 {
                    parts.push(SplitPart {
                        loan_id: None,
                        quantity: outstanding,
                    });
                }
                actions.push(LinkAction::Split {
                    return_id: ret.id,
                    parts,
                });
            }
        }
    }

    ReconcilePlan { actions, anomalies }
}

/// Scans the store once, plans, and applies the plan atomically.
pub fn reconcile(store: &dyn MovementStore) -> Result<ReconcileReport> {
    let movements = store.scan_all()?;
    let plan = plan(&movements);

    for anomaly in &plan.anomalies {
        warn!(
            return_id = anomaly.return_id,
            item_key = %anomaly.item_key,
            unmatched = anomaly.unmatched,
            "data anomaly: {anomaly}"
        );
    }

    let mut report = plan.report();
    if plan.is_empty() {
        report.digest = ledger_digest(&movements)?;
        info!(movements = movements.len(), "ledger already reconciled");
        return Ok(report);
    }

    let created = store.apply_reconciliation(&plan)?;
    report.records_created = created.len();
    report.digest = ledger_digest(&store.scan_all()?)?;

    info!(
        self_linked = report.self_linked,
        linked_in_place = report.linked_in_place,
        split_returns = report.split_returns,
        records_created = report.records_created,
        anomalies = report.anomalies.len(),
        "reconciliation applied"
    );
    Ok(report)
}
