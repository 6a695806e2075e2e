//! An in-memory `Ledger` used by unit, scenario and property tests. Locking
//! is modelled with a per-account `HashSet` of held keys rather than real
//! row locks, which is enough to exercise skip-locked semantics in a single
//! process without pulling in a database.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use ledger_primitives::{AutoId, CreditorId, DebtorId, TransferId};

use crate::{
    Account, FinalizationRequest, Ledger, PendingAccountChange, PreparedTransfer, StatusFlags, StorageError,
    TransferRequest,
};

type AccountKey = (DebtorId, CreditorId);
type PreparedTransferKey = (DebtorId, CreditorId, TransferId);
type FinalizationRequestKey = (DebtorId, CreditorId, TransferId);

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountKey, Account>,
    locked: HashSet<AccountKey>,
    transfer_requests: HashMap<AccountKey, Vec<TransferRequest>>,
    next_transfer_request_id: AutoId,
    finalization_requests: HashMap<FinalizationRequestKey, FinalizationRequest>,
    prepared_transfers: HashMap<PreparedTransferKey, PreparedTransfer>,
    pending_changes: HashMap<AccountKey, Vec<PendingAccountChange>>,
    next_pending_change_id: AutoId,
}

/// A process-local `Ledger` backed by `HashMap`s behind a single mutex.
/// Not for production use (scalability here is entirely about row-level
/// locking in a real database); this is the reference implementation the
/// engine's tests run against.
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        MemoryLedger { inner: Mutex::new(Inner::default()) }
    }

    /// Releases a lock taken by `lock_account`, so a later worker pass can
    /// acquire it again. Real backends do this implicitly at transaction
    /// commit/rollback; callers of `MemoryLedger` must call it explicitly
    /// once their unit of work is done.
    pub fn unlock_account(&self, debtor_id: DebtorId, creditor_id: CreditorId) {
        self.inner.lock().unwrap().locked.remove(&(debtor_id, creditor_id));
    }
}

fn lock(inner: &Mutex<Inner>) -> std::sync::MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn lock_account(&self, debtor_id: DebtorId, creditor_id: CreditorId) -> Result<Option<Account>, StorageError> {
        let mut inner = lock(&self.inner);
        let key = (debtor_id, creditor_id);
        if inner.locked.contains(&key) {
            return Ok(None);
        }
        inner.locked.insert(key);
        Ok(inner.accounts.get(&key).cloned())
    }

    async fn get_account(&self, debtor_id: DebtorId, creditor_id: CreditorId) -> Result<Option<Account>, StorageError> {
        Ok(lock(&self.inner).accounts.get(&(debtor_id, creditor_id)).cloned())
    }

    async fn upsert_account(&self, account: Account) -> Result<(), StorageError> {
        let key = (account.debtor_id, account.creditor_id);
        let mut inner = lock(&self.inner);
        inner.accounts.insert(key, account);
        // Models a transaction commit: writing the row back releases the lock.
        inner.locked.remove(&key);
        Ok(())
    }

    async fn delete_account(&self, debtor_id: DebtorId, creditor_id: CreditorId) -> Result<(), StorageError> {
        let key = (debtor_id, creditor_id);
        let mut inner = lock(&self.inner);
        inner.accounts.remove(&key);
        inner.locked.remove(&key);
        Ok(())
    }

    async fn scan_accounts(&self) -> Result<Vec<Account>, StorageError> {
        Ok(lock(&self.inner).accounts.values().cloned().collect())
    }

    async fn reachable_recipients(
        &self,
        debtor_id: DebtorId,
        candidates: &[CreditorId],
    ) -> Result<HashSet<CreditorId>, StorageError> {
        let inner = lock(&self.inner);
        Ok(candidates
            .iter()
            .copied()
            .filter(|creditor_id| {
                inner
                    .accounts
                    .get(&(debtor_id, *creditor_id))
                    .map(|a| !a.status_flags.intersects(StatusFlags::DELETED | StatusFlags::UNREACHABLE))
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn insert_transfer_request(&self, mut request: TransferRequest) -> Result<AutoId, StorageError> {
        let mut inner = lock(&self.inner);
        inner.next_transfer_request_id += 1;
        let id = inner.next_transfer_request_id;
        request.auto_id = id;
        let key = (request.debtor_id, request.sender_creditor_id);
        inner.transfer_requests.entry(key).or_default().push(request);
        Ok(id)
    }

    async fn distinct_transfer_request_senders(&self) -> Result<Vec<(DebtorId, CreditorId)>, StorageError> {
        Ok(lock(&self.inner)
            .transfer_requests
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(k, _)| *k)
            .collect())
    }

    async fn drain_transfer_requests(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
    ) -> Result<Vec<TransferRequest>, StorageError> {
        Ok(lock(&self.inner)
            .transfer_requests
            .get(&(debtor_id, sender_creditor_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_transfer_requests(&self, rows: &[(DebtorId, CreditorId, AutoId)]) -> Result<(), StorageError> {
        let mut inner = lock(&self.inner);
        for (debtor_id, creditor_id, auto_id) in rows {
            if let Some(queue) = inner.transfer_requests.get_mut(&(*debtor_id, *creditor_id)) {
                queue.retain(|r| r.auto_id != *auto_id);
            }
        }
        Ok(())
    }

    async fn insert_finalization_request(&self, request: FinalizationRequest) -> Result<(), StorageError> {
        let key = (request.debtor_id, request.sender_creditor_id, request.transfer_id);
        let mut inner = lock(&self.inner);
        if inner.finalization_requests.contains_key(&key) {
            return Err(StorageError::DuplicateKey);
        }
        inner.finalization_requests.insert(key, request);
        Ok(())
    }

    async fn distinct_finalization_request_senders(&self) -> Result<Vec<(DebtorId, CreditorId)>, StorageError> {
        let inner = lock(&self.inner);
        let mut keys: HashSet<(DebtorId, CreditorId)> =
            inner.finalization_requests.keys().map(|(d, c, _)| (*d, *c)).collect();
        Ok(keys.drain().collect())
    }

    async fn drain_finalization_requests(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
    ) -> Result<Vec<FinalizationRequest>, StorageError> {
        Ok(lock(&self.inner)
            .finalization_requests
            .values()
            .filter(|r| r.debtor_id == debtor_id && r.sender_creditor_id == sender_creditor_id)
            .cloned()
            .collect())
    }

    async fn delete_finalization_request(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
        transfer_id: TransferId,
    ) -> Result<(), StorageError> {
        lock(&self.inner).finalization_requests.remove(&(debtor_id, sender_creditor_id, transfer_id));
        Ok(())
    }

    async fn insert_prepared_transfer(&self, transfer: PreparedTransfer) -> Result<(), StorageError> {
        let key = (transfer.debtor_id, transfer.sender_creditor_id, transfer.transfer_id);
        lock(&self.inner).prepared_transfers.insert(key, transfer);
        Ok(())
    }

    async fn get_prepared_transfer(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
        transfer_id: TransferId,
    ) -> Result<Option<PreparedTransfer>, StorageError> {
        Ok(lock(&self.inner).prepared_transfers.get(&(debtor_id, sender_creditor_id, transfer_id)).cloned())
    }

    async fn upsert_prepared_transfer(&self, transfer: PreparedTransfer) -> Result<(), StorageError> {
        self.insert_prepared_transfer(transfer).await
    }

    async fn delete_prepared_transfer(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
        transfer_id: TransferId,
    ) -> Result<(), StorageError> {
        lock(&self.inner).prepared_transfers.remove(&(debtor_id, sender_creditor_id, transfer_id));
        Ok(())
    }

    async fn scan_prepared_transfers(&self) -> Result<Vec<PreparedTransfer>, StorageError> {
        Ok(lock(&self.inner).prepared_transfers.values().cloned().collect())
    }

    async fn insert_pending_account_change(&self, mut change: PendingAccountChange) -> Result<(), StorageError> {
        let mut inner = lock(&self.inner);
        inner.next_pending_change_id += 1;
        change.auto_id = inner.next_pending_change_id;
        let key = (change.debtor_id, change.creditor_id);
        inner.pending_changes.entry(key).or_default().push(change);
        Ok(())
    }

    async fn distinct_pending_change_accounts(&self) -> Result<Vec<(DebtorId, CreditorId)>, StorageError> {
        Ok(lock(&self.inner)
            .pending_changes
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(k, _)| *k)
            .collect())
    }

    async fn drain_pending_account_changes(
        &self,
        debtor_id: DebtorId,
        creditor_id: CreditorId,
    ) -> Result<Vec<PendingAccountChange>, StorageError> {
        Ok(lock(&self.inner).pending_changes.remove(&(debtor_id, creditor_id)).unwrap_or_default())
    }
}
