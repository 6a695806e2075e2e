//! Scalar types and constants shared across the ledger crates.
//!
//! Nothing here touches storage or time policy: every quantity that needs
//! "the current time" takes it as an explicit `DateTime<Utc>` parameter
//! wherever it is used, never reads a clock itself.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A debtor, identified by the signed 64-bit id of its issuing account.
pub type DebtorId = i64;

/// A creditor, identified by the signed 64-bit id of its holding account.
pub type CreditorId = i64;

/// A signed 64-bit monetary amount in the smallest indivisible unit.
pub type Amount = i64;

/// Per-sender prepared-transfer counter.
pub type TransferId = i64;

/// Per-account strictly increasing transfer-event counter (no wrap).
pub type TransferNumber = i64;

/// Annual interest rate, a finite double-precision percentage.
pub type InterestRate = f64;

/// Auto-increment id used by the batch queue tables.
pub type AutoId = i64;

pub const MIN_INT64: i64 = i64::MIN;
pub const MAX_INT64: i64 = i64::MAX;
pub const MAX_INT32: i32 = i32::MAX;

/// The creditor id of a debtor's own issuing account.
pub const ROOT_CREDITOR_ID: CreditorId = MIN_INT64;

pub const INTEREST_RATE_FLOOR: f64 = -50.0;
pub const INTEREST_RATE_CEIL: f64 = 100.0;

pub const SECONDS_IN_DAY: i64 = 24 * 60 * 60;
pub const SECONDS_IN_YEAR: f64 = 365.25 * 24.0 * 60.0 * 60.0;

pub const TRANSFER_NOTE_MAX_BYTES: usize = 500;
pub const CONFIG_DATA_MAX_BYTES: usize = 2000;

/// A 32-bit wrapping sequence number with signed-window comparison.
///
/// Total order within any window of `2^31` consecutive values; comparisons
/// outside that window are not meaningful, matching the wire format's
/// wraparound behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SeqNum(pub i32);

impl SeqNum {
    pub fn new(value: i32) -> Self {
        SeqNum(value)
    }

    /// `true` if `self` is later than `other` per `(self - other) mod 2^32 ∈ (0, 2^31)`.
    pub fn is_later_than(self, other: SeqNum) -> bool {
        is_later(self.0, other.0)
    }

    pub fn wrapping_add(self, delta: i32) -> Self {
        SeqNum(self.0.wrapping_add(delta))
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signed-window wraparound comparison: `a` is later than `b` if
/// `(a - b) mod 2^32` lies in `(0, 2^31)`.
pub fn is_later(a: i32, b: i32) -> bool {
    let diff = a.wrapping_sub(b) as u32;
    diff != 0 && diff < (1u32 << 31)
}

/// Saturates a principal-delta addition to `±MAX_INT64`, reporting whether
/// saturation occurred so the caller can raise the `OVERFLOWN` flag.
pub fn saturate_principal(current: Amount, delta: i128) -> (Amount, bool) {
    let sum = current as i128 + delta;
    if sum > MAX_INT64 as i128 {
        (MAX_INT64, true)
    } else if sum < MIN_INT64 as i128 + 1 {
        // principal must stay strictly greater than MIN_INT64 (reserved sentinel)
        (MIN_INT64 + 1, true)
    } else {
        (sum as Amount, false)
    }
}

/// Saturates an unsigned non-negative accumulator (e.g. `total_locked_amount`)
/// at `MAX_INT64`, floored at zero.
pub fn saturate_nonneg(current: Amount, delta: i128) -> Amount {
    let sum = (current as i128 + delta).clamp(0, MAX_INT64 as i128);
    sum as Amount
}

/// Clamps a floating point amount into the representable `[-MAX_INT64, MAX_INT64]`
/// range used for `available_amount` computations.
pub fn clamp_amount(value: f64) -> Amount {
    if value.is_nan() {
        return 0;
    }
    if value >= MAX_INT64 as f64 {
        MAX_INT64
    } else if value <= MIN_INT64 as f64 {
        MIN_INT64 + 1
    } else {
        value as Amount
    }
}

pub fn clamp_interest_rate(rate: InterestRate) -> InterestRate {
    rate.clamp(INTEREST_RATE_FLOOR, INTEREST_RATE_CEIL)
}

/// `true` if `candidate` is strictly more recent than `reference` by more
/// than one second, the "two-field ordering" tie-break unit used by
/// configure-account and interest-rate-change staleness checks.
pub fn leads_by_more_than_one_second(candidate: DateTime<Utc>, reference: DateTime<Utc>) -> bool {
    (candidate - reference).num_milliseconds() > 1000
}
