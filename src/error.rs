use std::convert::Infallible;

use sled::transaction::TransactionError;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Quantity must be a positive integer")]
    ZeroQuantity,
    #[error("Item key must not be empty")]
    EmptyItemKey,
    #[error("{variant} borrower is missing the required field '{field}'")]
    MissingBorrowerField {
        variant: &'static str,
        field: &'static str,
    },
    #[error("Configuration value '{field}' is out of range: {value}")]
    InvalidConfig { field: &'static str, value: String },
}

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("Item '{0}' has no catalog entry")]
    UnknownItem(String),
    #[error("Loan {0} does not exist")]
    UnknownLoan(u64),
    #[error("Movement {0} does not exist")]
    UnknownMovement(u64),
    #[error("Insufficient stock for '{item_key}': requested {requested}, available {available}")]
    InsufficientStock {
        item_key: String,
        requested: u32,
        available: u32,
    },
    #[error("Return of {requested} exceeds the {pending} pending on loan {loan_id}")]
    OverReturn {
        loan_id: u64,
        requested: u32,
        pending: u32,
    },
    #[error("Item '{item_key}' still has {on_loan} unit(s) on loan")]
    ItemInUse { item_key: String, on_loan: u32 },
    #[error("Movement {movement_id} is already linked to loan {existing}")]
    LinkAlreadySet { movement_id: u64, existing: u64 },
    #[error("Movement {0} is not a loan")]
    NotALoan(u64),
    #[error("Movement {0} is not a return")]
    NotAReturn(u64),
    #[error("Movement {movement_id} cannot link to loan {loan_id} of a different item")]
    ItemMismatch { movement_id: u64, loan_id: u64 },
    #[error("Movement id counter is corrupt")]
    CorruptCounter,
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("Store error: {0}")]
    Store(#[from] sled::Error),
    #[error("Encoding error: {0}")]
    Encode(#[from] minicbor::encode::Error<Infallible>),
    #[error("Decoding error: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("Failed to load configuration: {0}")]
    Config(#[from] ::config::ConfigError),
}

impl From<TransactionError<LedgerError>> for LedgerError {
    fn from(value: TransactionError<LedgerError>) -> Self {
        match value {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => LedgerError::Store(err),
        }
    }
}
