//! `Ledger` backed by PostgreSQL via `sqlx`, using
//! `SELECT ... FOR UPDATE SKIP LOCKED` as the sole concurrency primitive:
//! many independent workers, no in-process locks, the database is the
//! source of truth.

use std::collections::HashSet;

use async_trait::async_trait;
use ledger_primitives::{AutoId, CreditorId, DebtorId, SeqNum, TransferId};
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::{
    Account, ConfigFlags, CoordinatorKey, FinalizationRequest, Ledger, PendingAccountChange, PreparedTransfer,
    StatusFlags, StorageError, TransferRequest,
};

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        PgLedger { pool }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::DuplicateKey,
            other => StorageError::Backend(other.to_string()),
        }
    }
}

fn account_from_row(row: &PgRow) -> Result<Account, StorageError> {
    Ok(Account {
        debtor_id: row.try_get("debtor_id")?,
        creditor_id: row.try_get("creditor_id")?,
        principal: row.try_get("principal")?,
        interest: row.try_get("interest")?,
        interest_rate: row.try_get("interest_rate")?,
        last_interest_rate_change_ts: row.try_get("last_interest_rate_change_ts")?,
        previous_interest_rate: row.try_get("previous_interest_rate")?,
        total_locked_amount: row.try_get("total_locked_amount")?,
        pending_transfers_count: row.try_get("pending_transfers_count")?,
        last_transfer_id: row.try_get("last_transfer_id")?,
        last_change_seqnum: SeqNum::new(row.try_get("last_change_seqnum")?),
        last_change_ts: row.try_get("last_change_ts")?,
        last_transfer_number: row.try_get("last_transfer_number")?,
        last_transfer_committed_at_ts: row.try_get("last_transfer_committed_at_ts")?,
        last_config_ts: row.try_get("last_config_ts")?,
        last_config_seqnum: SeqNum::new(row.try_get("last_config_seqnum")?),
        creation_date: row.try_get("creation_date")?,
        negligible_amount: row.try_get("negligible_amount")?,
        config_flags: ConfigFlags::from_bits_truncate(row.try_get("config_flags")?),
        status_flags: StatusFlags::from_bits_truncate(row.try_get("status_flags")?),
        last_reminder_ts: row.try_get("last_reminder_ts")?,
    })
}

fn prepared_transfer_from_row(row: &PgRow) -> Result<PreparedTransfer, StorageError> {
    Ok(PreparedTransfer {
        debtor_id: row.try_get("debtor_id")?,
        sender_creditor_id: row.try_get("sender_creditor_id")?,
        transfer_id: row.try_get("transfer_id")?,
        coordinator: CoordinatorKey {
            coordinator_type: row.try_get("coordinator_type")?,
            coordinator_id: row.try_get("coordinator_id")?,
            coordinator_request_id: row.try_get("coordinator_request_id")?,
        },
        recipient_creditor_id: row.try_get("recipient_creditor_id")?,
        locked_amount: row.try_get("locked_amount")?,
        min_account_balance: row.try_get("min_account_balance")?,
        min_interest_rate: row.try_get("min_interest_rate")?,
        demurrage_rate: row.try_get("demurrage_rate")?,
        deadline: row.try_get("deadline")?,
        prepared_at_ts: row.try_get("prepared_at_ts")?,
        last_reminder_ts: row.try_get("last_reminder_ts")?,
    })
}

#[async_trait]
impl Ledger for PgLedger {
    async fn lock_account(&self, debtor_id: DebtorId, creditor_id: CreditorId) -> Result<Option<Account>, StorageError> {
        let row = sqlx::query(
            "SELECT * FROM account WHERE debtor_id = $1 AND creditor_id = $2 FOR UPDATE SKIP LOCKED",
        )
        .bind(debtor_id)
        .bind(creditor_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn get_account(&self, debtor_id: DebtorId, creditor_id: CreditorId) -> Result<Option<Account>, StorageError> {
        let row = sqlx::query("SELECT * FROM account WHERE debtor_id = $1 AND creditor_id = $2")
            .bind(debtor_id)
            .bind(creditor_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn upsert_account(&self, account: Account) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO account (
                debtor_id, creditor_id, principal, interest, interest_rate,
                last_interest_rate_change_ts, previous_interest_rate, total_locked_amount,
                pending_transfers_count, last_transfer_id, last_change_seqnum, last_change_ts,
                last_transfer_number, last_transfer_committed_at_ts, last_config_ts,
                last_config_seqnum, creation_date, negligible_amount, config_flags,
                status_flags, last_reminder_ts
             ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21)
             ON CONFLICT (debtor_id, creditor_id) DO UPDATE SET
                principal = EXCLUDED.principal,
                interest = EXCLUDED.interest,
                interest_rate = EXCLUDED.interest_rate,
                last_interest_rate_change_ts = EXCLUDED.last_interest_rate_change_ts,
                previous_interest_rate = EXCLUDED.previous_interest_rate,
                total_locked_amount = EXCLUDED.total_locked_amount,
                pending_transfers_count = EXCLUDED.pending_transfers_count,
                last_transfer_id = EXCLUDED.last_transfer_id,
                last_change_seqnum = EXCLUDED.last_change_seqnum,
                last_change_ts = EXCLUDED.last_change_ts,
                last_transfer_number = EXCLUDED.last_transfer_number,
                last_transfer_committed_at_ts = EXCLUDED.last_transfer_committed_at_ts,
                last_config_ts = EXCLUDED.last_config_ts,
                last_config_seqnum = EXCLUDED.last_config_seqnum,
                negligible_amount = EXCLUDED.negligible_amount,
                config_flags = EXCLUDED.config_flags,
                status_flags = EXCLUDED.status_flags,
                last_reminder_ts = EXCLUDED.last_reminder_ts",
        )
        .bind(account.debtor_id)
        .bind(account.creditor_id)
        .bind(account.principal)
        .bind(account.interest)
        .bind(account.interest_rate)
        .bind(account.last_interest_rate_change_ts)
        .bind(account.previous_interest_rate)
        .bind(account.total_locked_amount)
        .bind(account.pending_transfers_count)
        .bind(account.last_transfer_id)
        .bind(account.last_change_seqnum.0)
        .bind(account.last_change_ts)
        .bind(account.last_transfer_number)
        .bind(account.last_transfer_committed_at_ts)
        .bind(account.last_config_ts)
        .bind(account.last_config_seqnum.0)
        .bind(account.creation_date)
        .bind(account.negligible_amount)
        .bind(account.config_flags.bits())
        .bind(account.status_flags.bits())
        .bind(account.last_reminder_ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_account(&self, debtor_id: DebtorId, creditor_id: CreditorId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM account WHERE debtor_id = $1 AND creditor_id = $2")
            .bind(debtor_id)
            .bind(creditor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let rows = sqlx::query("SELECT * FROM account").fetch_all(&self.pool).await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn reachable_recipients(
        &self,
        debtor_id: DebtorId,
        candidates: &[CreditorId],
    ) -> Result<HashSet<CreditorId>, StorageError> {
        let rows = sqlx::query(
            "SELECT creditor_id FROM account
             WHERE debtor_id = $1 AND creditor_id = ANY($2)
               AND (status_flags & $3) = 0",
        )
        .bind(debtor_id)
        .bind(candidates)
        .bind((StatusFlags::DELETED | StatusFlags::UNREACHABLE).bits())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| r.try_get::<CreditorId, _>("creditor_id").map_err(StorageError::from)).collect()
    }

    async fn insert_transfer_request(&self, request: TransferRequest) -> Result<AutoId, StorageError> {
        let row = sqlx::query(
            "INSERT INTO transfer_request (
                debtor_id, sender_creditor_id, coordinator_type, coordinator_id,
                coordinator_request_id, min_locked_amount, max_locked_amount,
                recipient_creditor_id, ts, max_commit_delay_seconds, min_interest_rate,
                min_account_balance
             ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12) RETURNING auto_id",
        )
        .bind(request.debtor_id)
        .bind(request.sender_creditor_id)
        .bind(request.coordinator.coordinator_type)
        .bind(request.coordinator.coordinator_id)
        .bind(request.coordinator.coordinator_request_id)
        .bind(request.min_locked_amount)
        .bind(request.max_locked_amount)
        .bind(request.recipient_creditor_id)
        .bind(request.ts)
        .bind(request.max_commit_delay_seconds)
        .bind(request.min_interest_rate)
        .bind(request.min_account_balance)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("auto_id")?)
    }

    async fn distinct_transfer_request_senders(&self) -> Result<Vec<(DebtorId, CreditorId)>, StorageError> {
        let rows = sqlx::query("SELECT DISTINCT debtor_id, sender_creditor_id FROM transfer_request")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| Ok((r.try_get("debtor_id")?, r.try_get("sender_creditor_id")?)))
            .collect()
    }

    async fn drain_transfer_requests(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
    ) -> Result<Vec<TransferRequest>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM transfer_request WHERE debtor_id = $1 AND sender_creditor_id = $2
             ORDER BY auto_id FOR UPDATE SKIP LOCKED",
        )
        .bind(debtor_id)
        .bind(sender_creditor_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(TransferRequest {
                    debtor_id: row.try_get("debtor_id")?,
                    sender_creditor_id: row.try_get("sender_creditor_id")?,
                    auto_id: row.try_get("auto_id")?,
                    coordinator: CoordinatorKey {
                        coordinator_type: row.try_get("coordinator_type")?,
                        coordinator_id: row.try_get("coordinator_id")?,
                        coordinator_request_id: row.try_get("coordinator_request_id")?,
                    },
                    min_locked_amount: row.try_get("min_locked_amount")?,
                    max_locked_amount: row.try_get("max_locked_amount")?,
                    recipient_creditor_id: row.try_get("recipient_creditor_id")?,
                    ts: row.try_get("ts")?,
                    max_commit_delay_seconds: row.try_get("max_commit_delay_seconds")?,
                    min_interest_rate: row.try_get("min_interest_rate")?,
                    min_account_balance: row.try_get("min_account_balance")?,
                })
            })
            .collect()
    }

    async fn delete_transfer_requests(&self, rows: &[(DebtorId, CreditorId, AutoId)]) -> Result<(), StorageError> {
        for (debtor_id, creditor_id, auto_id) in rows {
            sqlx::query(
                "DELETE FROM transfer_request WHERE debtor_id = $1 AND sender_creditor_id = $2 AND auto_id = $3",
            )
            .bind(debtor_id)
            .bind(creditor_id)
            .bind(auto_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn insert_finalization_request(&self, request: FinalizationRequest) -> Result<(), StorageError> {
        let result = sqlx::query(
            "INSERT INTO finalization_request (
                debtor_id, sender_creditor_id, transfer_id, coordinator_type, coordinator_id,
                coordinator_request_id, committed_amount, transfer_note_format, transfer_note, ts
             ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(request.debtor_id)
        .bind(request.sender_creditor_id)
        .bind(request.transfer_id)
        .bind(request.coordinator.coordinator_type)
        .bind(request.coordinator.coordinator_id)
        .bind(request.coordinator.coordinator_request_id)
        .bind(request.committed_amount)
        .bind(request.transfer_note_format)
        .bind(request.transfer_note)
        .bind(request.ts)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(StorageError::from(e)),
        }
    }

    async fn distinct_finalization_request_senders(&self) -> Result<Vec<(DebtorId, CreditorId)>, StorageError> {
        let rows = sqlx::query("SELECT DISTINCT debtor_id, sender_creditor_id FROM finalization_request")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| Ok((r.try_get("debtor_id")?, r.try_get("sender_creditor_id")?)))
            .collect()
    }

    async fn drain_finalization_requests(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
    ) -> Result<Vec<FinalizationRequest>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM finalization_request WHERE debtor_id = $1 AND sender_creditor_id = $2
             ORDER BY transfer_id FOR UPDATE SKIP LOCKED",
        )
        .bind(debtor_id)
        .bind(sender_creditor_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(FinalizationRequest {
                    debtor_id: row.try_get("debtor_id")?,
                    sender_creditor_id: row.try_get("sender_creditor_id")?,
                    transfer_id: row.try_get("transfer_id")?,
                    coordinator: CoordinatorKey {
                        coordinator_type: row.try_get("coordinator_type")?,
                        coordinator_id: row.try_get("coordinator_id")?,
                        coordinator_request_id: row.try_get("coordinator_request_id")?,
                    },
                    committed_amount: row.try_get("committed_amount")?,
                    transfer_note_format: row.try_get("transfer_note_format")?,
                    transfer_note: row.try_get("transfer_note")?,
                    ts: row.try_get("ts")?,
                })
            })
            .collect()
    }

    async fn delete_finalization_request(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
        transfer_id: TransferId,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "DELETE FROM finalization_request WHERE debtor_id = $1 AND sender_creditor_id = $2 AND transfer_id = $3",
        )
        .bind(debtor_id)
        .bind(sender_creditor_id)
        .bind(transfer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_prepared_transfer(&self, transfer: PreparedTransfer) -> Result<(), StorageError> {
        self.upsert_prepared_transfer(transfer).await
    }

    async fn get_prepared_transfer(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
        transfer_id: TransferId,
    ) -> Result<Option<PreparedTransfer>, StorageError> {
        let row = sqlx::query(
            "SELECT * FROM prepared_transfer WHERE debtor_id = $1 AND sender_creditor_id = $2 AND transfer_id = $3",
        )
        .bind(debtor_id)
        .bind(sender_creditor_id)
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(prepared_transfer_from_row).transpose()
    }

    async fn upsert_prepared_transfer(&self, transfer: PreparedTransfer) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO prepared_transfer (
                debtor_id, sender_creditor_id, transfer_id, coordinator_type, coordinator_id,
                coordinator_request_id, recipient_creditor_id, locked_amount, min_account_balance,
                min_interest_rate, demurrage_rate, deadline, prepared_at_ts, last_reminder_ts
             ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
             ON CONFLICT (debtor_id, sender_creditor_id, transfer_id) DO UPDATE SET
                last_reminder_ts = EXCLUDED.last_reminder_ts",
        )
        .bind(transfer.debtor_id)
        .bind(transfer.sender_creditor_id)
        .bind(transfer.transfer_id)
        .bind(transfer.coordinator.coordinator_type)
        .bind(transfer.coordinator.coordinator_id)
        .bind(transfer.coordinator.coordinator_request_id)
        .bind(transfer.recipient_creditor_id)
        .bind(transfer.locked_amount)
        .bind(transfer.min_account_balance)
        .bind(transfer.min_interest_rate)
        .bind(transfer.demurrage_rate)
        .bind(transfer.deadline)
        .bind(transfer.prepared_at_ts)
        .bind(transfer.last_reminder_ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_prepared_transfer(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
        transfer_id: TransferId,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "DELETE FROM prepared_transfer WHERE debtor_id = $1 AND sender_creditor_id = $2 AND transfer_id = $3",
        )
        .bind(debtor_id)
        .bind(sender_creditor_id)
        .bind(transfer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn scan_prepared_transfers(&self) -> Result<Vec<PreparedTransfer>, StorageError> {
        let rows = sqlx::query("SELECT * FROM prepared_transfer").fetch_all(&self.pool).await?;
        rows.iter().map(prepared_transfer_from_row).collect()
    }

    async fn insert_pending_account_change(&self, change: PendingAccountChange) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO pending_account_change (
                debtor_id, creditor_id, principal_delta, interest_delta, unlocked_amount,
                coordinator_type, coordinator_id, coordinator_request_id, other_creditor_id,
                transfer_note, inserted_at_ts
             ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
        )
        .bind(change.debtor_id)
        .bind(change.creditor_id)
        .bind(change.principal_delta)
        .bind(change.interest_delta)
        .bind(change.unlocked_amount)
        .bind(change.coordinator.coordinator_type)
        .bind(change.coordinator.coordinator_id)
        .bind(change.coordinator.coordinator_request_id)
        .bind(change.other_creditor_id)
        .bind(change.transfer_note)
        .bind(change.inserted_at_ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn distinct_pending_change_accounts(&self) -> Result<Vec<(DebtorId, CreditorId)>, StorageError> {
        let rows = sqlx::query("SELECT DISTINCT debtor_id, creditor_id FROM pending_account_change")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| Ok((r.try_get("debtor_id")?, r.try_get("creditor_id")?))).collect()
    }

    async fn drain_pending_account_changes(
        &self,
        debtor_id: DebtorId,
        creditor_id: CreditorId,
    ) -> Result<Vec<PendingAccountChange>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM pending_account_change WHERE debtor_id = $1 AND creditor_id = $2
             ORDER BY auto_id FOR UPDATE SKIP LOCKED",
        )
        .bind(debtor_id)
        .bind(creditor_id)
        .fetch_all(&self.pool)
        .await?;
        let changes: Result<Vec<PendingAccountChange>, StorageError> = rows
            .iter()
            .map(|row| {
                Ok(PendingAccountChange {
                    debtor_id: row.try_get("debtor_id")?,
                    creditor_id: row.try_get("creditor_id")?,
                    auto_id: row.try_get("auto_id")?,
                    principal_delta: row.try_get("principal_delta")?,
                    interest_delta: row.try_get("interest_delta")?,
                    unlocked_amount: row.try_get("unlocked_amount")?,
                    coordinator: CoordinatorKey {
                        coordinator_type: row.try_get("coordinator_type")?,
                        coordinator_id: row.try_get("coordinator_id")?,
                        coordinator_request_id: row.try_get("coordinator_request_id")?,
                    },
                    other_creditor_id: row.try_get("other_creditor_id")?,
                    transfer_note: row.try_get("transfer_note")?,
                    inserted_at_ts: row.try_get("inserted_at_ts")?,
                })
            })
            .collect();
        let changes = changes?;
        let ids: Vec<AutoId> = changes.iter().map(|c| c.auto_id).collect();
        if !ids.is_empty() {
            sqlx::query("DELETE FROM pending_account_change WHERE auto_id = ANY($1)")
                .bind(&ids)
                .execute(&self.pool)
                .await?;
        }
        Ok(changes)
    }
}
