//! End-to-end scenarios driving `MemoryLedger` through `ledger-core`'s
//! public entry points, one test per scenario.

use chrono::{Duration, Utc};
use ledger_core::{
    capitalize_interest, configure_account, finalize_transfer, prepare_transfer, process_finalization_requests,
    process_transfer_requests, ConfigureAccountRequest, FinalizeTransferRequest, PrepareTransferRequest,
};
use ledger_primitives::{SeqNum, ROOT_CREDITOR_ID};
use ledger_signals::{Outbox, Signal, StatusCode};
use ledger_storage::memory::MemoryLedger;
use ledger_storage::{Account, ConfigFlags, Ledger};

fn configure_req(debtor_id: i64, creditor_id: i64, ts: chrono::DateTime<Utc>, seqnum: i32) -> ConfigureAccountRequest {
    ConfigureAccountRequest {
        debtor_id,
        creditor_id,
        ts,
        seqnum: SeqNum::new(seqnum),
        negligible_amount: 0.0,
        config_flags: ConfigFlags::empty(),
        config_data: String::new(),
        signalbus_max_delay_days: 14,
    }
}

fn prepare_req(debtor_id: i64, sender: i64, recipient: i64, min: i64, max: i64, ts: chrono::DateTime<Utc>, max_commit_delay_seconds: i64) -> PrepareTransferRequest {
    PrepareTransferRequest {
        coordinator_type: "direct".into(),
        coordinator_id: 1,
        coordinator_request_id: 1,
        min_locked_amount: min,
        max_locked_amount: max,
        debtor_id,
        sender_creditor_id: sender,
        recipient: (recipient as u64).to_string(),
        ts,
        max_commit_delay_seconds,
        min_interest_rate: -100.0,
    }
}

#[tokio::test]
async fn s1_issue_from_root() {
    let ledger = MemoryLedger::new();
    let now = Utc::now();
    let mut outbox = Outbox::new();

    configure_account(&ledger, configure_req(1, ROOT_CREDITOR_ID, now, 1), now, &mut outbox).await.unwrap();
    configure_account(&ledger, configure_req(1, 10, now, 1), now, &mut outbox).await.unwrap();

    prepare_transfer(&ledger, prepare_req(1, ROOT_CREDITOR_ID, 10, 100, 100, now, 3600), &mut outbox).await.unwrap();
    process_transfer_requests(&ledger, 1, ROOT_CREDITOR_ID, now, Duration::seconds(3600), &mut outbox).await.unwrap();

    let transfer_id = {
        let prepared = outbox.as_slice().iter().rev().find_map(|s| match s {
            Signal::PreparedTransfer(p) => Some(p.transfer_id),
            _ => None,
        });
        prepared.expect("a PreparedTransfer signal must have been emitted")
    };

    finalize_transfer(
        &ledger,
        FinalizeTransferRequest {
            debtor_id: 1,
            sender_creditor_id: ROOT_CREDITOR_ID,
            transfer_id,
            coordinator_type: "direct".into(),
            coordinator_id: 1,
            coordinator_request_id: 1,
            committed_amount: 100,
            transfer_note_format: String::new(),
            transfer_note: String::new(),
            ts: now,
        },
    )
    .await
    .unwrap();
    process_finalization_requests(&ledger, 1, ROOT_CREDITOR_ID, now, &mut outbox).await.unwrap();

    let root = ledger.get_account(1, ROOT_CREDITOR_ID).await.unwrap().unwrap();
    assert_eq!(root.principal, -100);

    // Apply the queued PendingAccountChange onto creditor 10 to observe the
    // credited side; this is the batch worker's job in a running system.
    ledger_core::process_pending_account_changes(&ledger, 1, 10, now, &mut outbox).await.unwrap();
    let creditor = ledger.get_account(1, 10).await.unwrap().unwrap();
    assert_eq!(creditor.principal, 100);

    let account_transfers = outbox.as_slice().iter().filter(|s| matches!(s, Signal::AccountTransfer(_))).count();
    assert_eq!(account_transfers, 2);

    let finalized = outbox.as_slice().iter().rev().find_map(|s| match s {
        Signal::FinalizedTransfer(f) => Some(f.clone()),
        _ => None,
    }).unwrap();
    assert_eq!(finalized.status_code, StatusCode::Ok);
}

#[tokio::test]
async fn s2_over_commit_is_rejected_without_reserving() {
    let ledger = MemoryLedger::new();
    let now = Utc::now();
    let mut outbox = Outbox::new();

    let mut ten = Account::new(1, 10, now);
    ten.principal = 100;
    ledger.upsert_account(ten).await.unwrap();
    ledger.upsert_account(Account::new(1, 11, now)).await.unwrap();

    prepare_transfer(&ledger, prepare_req(1, 10, 11, 200, 200, now, 3600), &mut outbox).await.unwrap();
    process_transfer_requests(&ledger, 1, 10, now, Duration::seconds(3600), &mut outbox).await.unwrap();

    assert_eq!(outbox.len(), 1);
    match &outbox.as_slice()[0] {
        Signal::RejectedTransfer(s) => assert_eq!(s.status_code, StatusCode::InsufficientAvailableAmount),
        other => panic!("unexpected signal {other:?}"),
    }
    let ten = ledger.get_account(1, 10).await.unwrap().unwrap();
    assert_eq!(ten.total_locked_amount, 0);
    assert!(ledger.scan_prepared_transfers().await.unwrap().is_empty());
}

#[tokio::test]
async fn s3_partial_prepare_then_rejection() {
    let ledger = MemoryLedger::new();
    let now = Utc::now();
    let mut outbox = Outbox::new();

    let mut ten = Account::new(1, 10, now);
    ten.principal = 150;
    ledger.upsert_account(ten).await.unwrap();
    ledger.upsert_account(Account::new(1, 11, now)).await.unwrap();

    prepare_transfer(&ledger, prepare_req(1, 10, 11, 50, 300, now, 3600), &mut outbox).await.unwrap();
    process_transfer_requests(&ledger, 1, 10, now, Duration::seconds(3600), &mut outbox).await.unwrap();

    match &outbox.as_slice()[0] {
        Signal::PreparedTransfer(s) => assert_eq!(s.sender_locked_amount, 150),
        other => panic!("unexpected signal {other:?}"),
    }
    let ten = ledger.get_account(1, 10).await.unwrap().unwrap();
    assert_eq!(ten.total_locked_amount, 150);

    let mut outbox2 = Outbox::new();
    prepare_transfer(&ledger, prepare_req(1, 10, 11, 1, 1, now, 3600), &mut outbox2).await.unwrap();
    process_transfer_requests(&ledger, 1, 10, now, Duration::seconds(3600), &mut outbox2).await.unwrap();
    match &outbox2.as_slice()[0] {
        Signal::RejectedTransfer(s) => assert_eq!(s.status_code, StatusCode::InsufficientAvailableAmount),
        other => panic!("unexpected signal {other:?}"),
    }
}

#[tokio::test]
async fn s4_stale_configure_is_dropped() {
    let ledger = MemoryLedger::new();
    let now = Utc::now();
    let mut outbox = Outbox::new();

    configure_account(&ledger, configure_req(1, 20, now, 5), now, &mut outbox).await.unwrap();
    assert_eq!(outbox.len(), 1);

    let mut stale = configure_req(1, 20, now - Duration::seconds(2), 9999);
    stale.config_flags = ConfigFlags::SCHEDULED_FOR_DELETION;
    configure_account(&ledger, stale, now, &mut outbox).await.unwrap();
    assert_eq!(outbox.len(), 1, "the older event must not have applied");

    let account = ledger.get_account(1, 20).await.unwrap().unwrap();
    assert!(!account.config_flags.contains(ConfigFlags::SCHEDULED_FOR_DELETION));
}

#[tokio::test]
async fn s5_interest_capitalize() {
    // `current_balance` compounds at `k = ln(1 + rate/100) / SECONDS_IN_YEAR`,
    // chosen so that a balance held for exactly one year grows by a factor
    // of exactly `1 + rate/100`. At `rate = 100.0` that is a factor of 2.0
    // over `SECONDS_IN_YEAR`, i.e. accumulated interest equal to the
    // starting principal.
    let ledger = MemoryLedger::new();
    let now = Utc::now();
    let mut outbox = Outbox::new();
    let one_year_ago = now - Duration::seconds(ledger_primitives::SECONDS_IN_YEAR as i64);

    ledger.upsert_account(Account::new(1, ROOT_CREDITOR_ID, now)).await.unwrap();
    let mut account = Account::new(1, 30, one_year_ago);
    account.principal = 10_000;
    account.interest_rate = 100.0;
    account.last_change_ts = one_year_ago;
    ledger.upsert_account(account).await.unwrap();

    capitalize_interest(&ledger, 1, 30, 1, now, &mut outbox).await.unwrap();

    let account = ledger.get_account(1, 30).await.unwrap().unwrap();
    assert!((account.principal - 20_000).abs() <= 2, "principal was {}", account.principal);
    assert!(account.interest.abs() < 1.0);

    let root_queue = ledger.drain_pending_account_changes(1, ROOT_CREDITOR_ID).await.unwrap();
    assert_eq!(root_queue.len(), 1);
    assert!((root_queue[0].principal_delta + 10_000).abs() <= 2);

    assert_eq!(outbox.as_slice().iter().filter(|s| matches!(s, Signal::AccountTransfer(_))).count(), 1);
    assert_eq!(outbox.as_slice().iter().filter(|s| matches!(s, Signal::AccountMaintenance(_))).count(), 1);
}

#[tokio::test]
async fn s6_deadline_miss() {
    let ledger = MemoryLedger::new();
    let now = Utc::now();
    let mut outbox = Outbox::new();

    ledger.upsert_account(Account::new(1, 10, now)).await.unwrap();
    ledger.upsert_account(Account::new(1, 11, now)).await.unwrap();
    let mut sender = ledger.get_account(1, 10).await.unwrap().unwrap();
    sender.principal = 1000;
    ledger.upsert_account(sender).await.unwrap();

    prepare_transfer(&ledger, prepare_req(1, 10, 11, 10, 10, now, 0), &mut outbox).await.unwrap();
    process_transfer_requests(&ledger, 1, 10, now, Duration::seconds(3600), &mut outbox).await.unwrap();
    let transfer_id = outbox.as_slice().iter().rev().find_map(|s| match s {
        Signal::PreparedTransfer(p) => Some(p.transfer_id),
        _ => None,
    }).unwrap();

    let later = now + Duration::seconds(1);
    finalize_transfer(
        &ledger,
        FinalizeTransferRequest {
            debtor_id: 1,
            sender_creditor_id: 10,
            transfer_id,
            coordinator_type: "direct".into(),
            coordinator_id: 1,
            coordinator_request_id: 1,
            committed_amount: 10,
            transfer_note_format: String::new(),
            transfer_note: String::new(),
            ts: later,
        },
    )
    .await
    .unwrap();
    process_finalization_requests(&ledger, 1, 10, later, &mut outbox).await.unwrap();

    let finalized = outbox.as_slice().iter().rev().find_map(|s| match s {
        Signal::FinalizedTransfer(f) => Some(f.clone()),
        _ => None,
    }).unwrap();
    assert_ne!(finalized.status_code, StatusCode::Ok);
    assert_eq!(finalized.committed_amount, 0);
    assert!(ledger.drain_pending_account_changes(1, 11).await.unwrap().is_empty());

    let sender = ledger.get_account(1, 10).await.unwrap().unwrap();
    assert_eq!(sender.total_locked_amount, 0);
    assert_eq!(sender.pending_transfers_count, 0);
}
