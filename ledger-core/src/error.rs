use thiserror::Error;

/// Internal invariant violations raised by the engine. These never cross
/// the bus boundary: a caller that hits one should roll back its
/// transaction and let the queue row be retried, rather than forward the
/// error to the requester.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    Storage(#[from] ledger_storage::StorageError),
    #[error("account {debtor_id}/{creditor_id} not found")]
    AccountNotFound { debtor_id: i64, creditor_id: i64 },
    #[error("account {debtor_id}/{creditor_id} is locked by another worker")]
    AccountLocked { debtor_id: i64, creditor_id: i64 },
}

pub type LedgerResult<T> = Result<T, LedgerError>;
