//! Smoke Screen Unit tests for loan ledger components
//!
//! These tests span the public API, checking each piece in isolation from the
//! integration scenarios. They are intended as a smoke screen and mostly cover
//! the happy path.
//!

use chrono::{Datelike, Timelike};
use loan_ledger::{
    Borrower, CalendarDate, CatalogItem, Category, LedgerConfig, LedgerError, LedgerService,
    MemoryStore, MovementDraft, MovementFilter, MovementKind, MovementStore, Session,
    ValidationError,
    movement::{LoanLink, TimeStamp},
    utils::{id_to_key, key_to_id, ledger_digest},
};
use std::sync::Arc;

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Store keys sort the same way as the ids they encode
    #[test]
    fn keys_sort_by_id() {
        let mut keys = vec![id_to_key(300), id_to_key(2), id_to_key(70_000)];
        keys.sort();

        let ids: Vec<u64> = keys.iter().filter_map(|k| key_to_id(k)).collect();
        assert_eq!(ids, vec![2, 300, 70_000]);
    }

    /// Digest of an empty ledger is still a full SHA-256 hex string
    #[test]
    fn digest_of_empty_ledger() {
        let digest = ledger_digest(&[]).unwrap();
        assert_eq!(digest.len(), 64);
    }

    /// Any change to a movement changes the digest
    #[test]
    fn digest_tracks_content() {
        let marta = Borrower::teacher("Marta").unwrap();
        let ts = TimeStamp::new_with(2024, 5, 1, 9, 0, 0).unwrap();
        let one = MovementDraft::loan("Chess", 1, marta.clone()).assign(1, ts.clone());
        let two = MovementDraft::loan("Chess", 2, marta).assign(1, ts);

        assert_ne!(
            ledger_digest(&[one]).unwrap(),
            ledger_digest(&[two]).unwrap()
        );
    }
}

// MOVEMENT MODULE TESTS
#[cfg(test)]
mod movement_tests {
    use super::*;

    /// TimeStamp can be created with specific date/time values
    #[test]
    fn timestamp_new_with_specific_values() {
        let ts = TimeStamp::new_with(2024, 3, 15, 14, 30, 45).unwrap();
        let dt = ts.to_datetime_utc();

        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.month(), 3);
        assert_eq!(dt.day(), 15);
        assert_eq!(dt.hour(), 14);
        assert_eq!(dt.minute(), 30);
        assert_eq!(dt.second(), 45);
        assert_eq!(ts.date(), CalendarDate::from_ymd(2024, 3, 15).unwrap());
    }

    /// Impossible dates are rejected rather than wrapped
    #[test]
    fn invalid_dates_are_none() {
        assert!(TimeStamp::new_with(2023, 2, 29, 0, 0, 0).is_none());
        assert!(CalendarDate::from_ymd(2024, 13, 1).is_none());
    }

    /// Due dates display day first
    #[test]
    fn calendar_date_display() {
        let date = CalendarDate::from_ymd(2024, 6, 3).unwrap();
        assert_eq!(date.to_string(), "03/06/2024");
        assert_eq!(
            date.add_days(30),
            CalendarDate::from_ymd(2024, 7, 3)
        );
    }

    /// Borrower fields are trimmed on construction
    #[test]
    fn borrower_fields_are_trimmed() {
        let student = Borrower::student(" Ana ", "Souza", " 5A").unwrap();

        assert_eq!(student.display_name(), "Ana Souza");
        assert_eq!(student.class_label(), Some("5A"));
        assert_eq!(Borrower::teacher("Marta").unwrap().class_label(), None);
    }

    /// Teachers need a name
    #[test]
    fn teacher_name_is_required() {
        assert_eq!(
            Borrower::teacher("   "),
            Err(ValidationError::MissingBorrowerField {
                variant: "Teacher",
                field: "name"
            })
        );
    }

    /// Explicit links survive assignment unchanged
    #[test]
    fn explicit_link_is_kept() {
        let marta = Borrower::teacher("Marta").unwrap();
        let ret = MovementDraft::return_of("Chess", 1, marta)
            .set_link(LoanLink::Loan(4))
            .assign(9, TimeStamp::new());

        assert_eq!(ret.kind, MovementKind::Return);
        assert_eq!(ret.loan_id, Some(4));
        assert!(ret.is_return());
    }

    /// Blank item keys fail draft validation
    #[test]
    fn blank_item_key_is_invalid() {
        let marta = Borrower::teacher("Marta").unwrap();
        assert_eq!(
            MovementDraft::loan("  ", 1, marta).validate(),
            Err(ValidationError::EmptyItemKey)
        );
    }
}

// STORE MODULE TESTS
#[cfg(test)]
mod store_tests {
    use super::*;

    /// Invalid drafts never reach the store
    #[test]
    fn memory_store_rejects_zero_quantity() {
        let store = MemoryStore::new();
        let marta = Borrower::teacher("Marta").unwrap();

        let result = store.append(&MovementDraft::loan("Chess", 0, marta));

        assert!(matches!(
            result,
            Err(LedgerError::Validation(ValidationError::ZeroQuantity))
        ));
        assert!(store.scan_all().unwrap().is_empty());
    }

    /// A loan cannot be linked to another loan
    #[test]
    fn loan_cannot_point_at_another_loan() {
        let store = MemoryStore::new();
        let marta = Borrower::teacher("Marta").unwrap();
        let first = store
            .append(&MovementDraft::loan("Chess", 1, marta.clone()))
            .unwrap();
        let second = store
            .append(&MovementDraft::loan("Chess", 1, marta).set_link(LoanLink::Unlinked))
            .unwrap();

        assert!(matches!(
            store.update_loan_link(second.id, first.id),
            Err(LedgerError::NotAReturn(id)) if id == second.id
        ));
    }

    /// Returns cannot be used as link targets
    #[test]
    fn return_is_not_a_link_target() {
        let store = MemoryStore::new();
        let marta = Borrower::teacher("Marta").unwrap();
        let ret_a = store
            .append(&MovementDraft::return_of("Chess", 1, marta.clone()))
            .unwrap();
        let ret_b = store
            .append(&MovementDraft::return_of("Chess", 1, marta))
            .unwrap();

        assert!(matches!(
            store.update_loan_link(ret_b.id, ret_a.id),
            Err(LedgerError::NotALoan(_))
        ));
    }
}

// CONFIG MODULE TESTS
#[cfg(test)]
mod config_tests {
    use super::*;

    /// Defaults describe a three day loan period
    #[test]
    fn default_config_is_valid() {
        let config = LedgerConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.default_loan_days, 3);
    }

    /// Zero day loan periods are refused
    #[test]
    fn zero_day_period_is_invalid() {
        let config = LedgerConfig {
            default_loan_days: 0,
            ..LedgerConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidConfig {
                field: "default_loan_days",
                ..
            })
        ));
    }
}

// SERVICE MODULE TESTS
#[cfg(test)]
mod service_tests {
    use super::*;
    use loan_ledger::{Availability, CatalogStore, LoanRequest};

    fn service_with(items: &[(&str, Category, u32)]) -> LedgerService {
        let store = Arc::new(MemoryStore::new());
        for (key, category, stock) in items {
            store
                .put(CatalogItem::new(key, *category, *stock).unwrap())
                .unwrap();
        }
        LedgerService::with_store(store)
    }

    /// Loans pick up the category stored in the catalog
    #[test]
    fn loan_copies_catalog_category() {
        let service = service_with(&[("Chess", Category::Game, 2)]);
        let session = Session::new("Rosa", 3);
        let marta = Borrower::teacher("Marta").unwrap();

        let loan_id = service
            .append_loan(LoanRequest::new("Chess", 1, marta), &session)
            .unwrap();

        let position = service
            .loan_position(loan_id, CalendarDate::today())
            .unwrap();
        assert_eq!(position.category, Category::Game);
        assert_eq!(position.quantity_pending, 1);
    }

    /// Balances list every catalog item, including untouched ones
    #[test]
    fn balances_cover_the_whole_catalog() {
        let service = service_with(&[
            ("Globe", Category::Other, 1),
            ("Atlas", Category::Book, 2),
        ]);

        let balances = service.balances().unwrap();
        let keys: Vec<&str> = balances.iter().map(|b| b.item_key.as_str()).collect();

        assert_eq!(keys, vec!["Atlas", "Globe"]);
        assert!(balances.iter().all(|b| b.on_loan == 0));
    }

    /// Statuses show who holds an item
    #[test]
    fn status_names_the_holder() {
        let service = service_with(&[("Atlas", Category::Book, 1)]);
        let ana = Borrower::student("Ana", "Souza", "5A").unwrap();
        service
            .append_loan(LoanRequest::new("Atlas", 1, ana.clone()), &Session::new("Rosa", 3))
            .unwrap();

        let statuses = service.statuses().unwrap();

        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, Availability::OnLoan);
        assert_eq!(statuses[0].borrower, Some(ana));
        assert!(statuses[0].due_on.is_some());
    }

    /// Zero quantity requests are rejected before touching the store
    #[test]
    fn zero_quantity_return_is_rejected() {
        let service = service_with(&[]);

        assert!(matches!(
            service.append_return(1, 0, "", &Session::new("Rosa", 3)),
            Err(LedgerError::Validation(ValidationError::ZeroQuantity))
        ));
    }

    /// History filters on the item key
    #[test]
    fn history_by_item() {
        let service = service_with(&[("Atlas", Category::Book, 1), ("Chess", Category::Game, 1)]);
        let session = Session::new("Rosa", 3);
        let marta = Borrower::teacher("Marta").unwrap();
        service
            .append_loan(LoanRequest::new("Atlas", 1, marta.clone()), &session)
            .unwrap();
        service
            .append_loan(LoanRequest::new("Chess", 1, marta), &session)
            .unwrap();

        let chess = service
            .history(&MovementFilter::new().item_contains("ches"))
            .unwrap();

        assert_eq!(chess.len(), 1);
        assert_eq!(chess[0].item_key, "Chess");
        assert_eq!(chess[0].operator, "Rosa");
    }
}
