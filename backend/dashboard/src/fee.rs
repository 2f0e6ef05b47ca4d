//! Submission fee preview.
//!
//! The contract charges `ceil(p³ · duration / fee_denominator)` smallest
//! units to register a project, where `p` is the rank the new project would
//! take (existing projects + 1) and `duration` is `end - start` in
//! milliseconds. The preview rounds up so it is never lower than the amount
//! the contract checks; an under-priced submission reverts.

use crate::errors::{DashboardError, Result};

/// Fee in smallest units for registering one more project.
pub fn submission_fee(
    existing_project_count: u64,
    start_ms: i64,
    end_ms: i64,
    fee_denominator: u64,
) -> Result<u64> {
    if end_ms <= start_ms {
        return Err(DashboardError::field(
            "end_date",
            "End date must be after start date",
        ));
    }
    if fee_denominator == 0 {
        return Err(DashboardError::Config(
            "fee denominator reported by the contract is zero".to_string(),
        ));
    }

    let duration = (i128::from(end_ms) - i128::from(start_ms)) as u128;
    let rank = u128::from(existing_project_count) + 1;
    let numerator = rank
        .checked_pow(3)
        .and_then(|cube| cube.checked_mul(duration))
        .ok_or_else(|| DashboardError::InvalidInput("submission fee overflows".to_string()))?;

    let fee = numerator.div_ceil(u128::from(fee_denominator));
    u64::try_from(fee)
        .map_err(|_| DashboardError::InvalidInput(format!("submission fee {fee} is out of range")))
}
