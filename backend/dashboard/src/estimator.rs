//! Payout preview for active projects.
//!
//! The contract pays projects from the fund once per payment period. This
//! module predicts the outcome of the next period: projects are served in
//! order of total vote weight, each taking its full monthly payment while the
//! fund lasts; the first project that cannot be paid in full takes whatever
//! is left, and everything after it gets nothing. Projects without votes are
//! never paid.
//!
//! The figures are an estimate. The authoritative payout runs on-chain.
//!
//! All amounts are smallest token units, so the full / partial / none
//! boundaries are exact integer comparisons.

use crate::errors::{DashboardError, Result};
use crate::normalize::UNITS_PER_TOKEN;
use crate::types::{PaymentStatus, ProcessedProject, ProjectStatus};

/// Annotate every project with `calculated_payment` and `payment_status`.
///
/// The result is ordered by `total_votes`, highest first. Projects with equal
/// totals keep their relative input order.
pub fn estimate(
    mut projects: Vec<ProcessedProject>,
    fund_balance: u64,
) -> Result<Vec<ProcessedProject>> {
    if let Some(p) = projects
        .iter()
        .find(|p| p.project.status != ProjectStatus::Active)
    {
        return Err(DashboardError::InvalidInput(format!(
            "project {} is {:?}; only active projects take part in a payout",
            p.project.id, p.project.status
        )));
    }

    if fund_balance == 0 {
        for p in &mut projects {
            assign(p, 0);
        }
        return Ok(projects);
    }

    projects.sort_by(|a, b| b.total_votes.cmp(&a.total_votes));

    let mut remaining = fund_balance;
    for p in &mut projects {
        let payment = if p.total_votes == 0 {
            0
        } else {
            p.project.monthly_payment.min(remaining)
        };
        remaining -= payment;
        assign(p, payment);
    }

    Ok(projects)
}

fn assign(project: &mut ProcessedProject, payment: u64) {
    project.calculated_payment = Some(payment);
    project.payment_status = Some(payment_status(payment, project.project.monthly_payment));
}

/// Classify a payment against the amount the project asked for.
pub fn payment_status(payment: u64, monthly_payment: u64) -> PaymentStatus {
    if payment == 0 {
        PaymentStatus::None
    } else if payment == monthly_payment {
        PaymentStatus::Full
    } else {
        PaymentStatus::Partial
    }
}

/// Convert a token-denominated balance into smallest units, rounding down.
pub fn balance_to_units(balance: f64) -> Result<u64> {
    if !balance.is_finite() || balance < 0.0 {
        return Err(DashboardError::InvalidInput(format!(
            "fund balance must be a non-negative number, got {balance}"
        )));
    }
    let units = (balance * UNITS_PER_TOKEN as f64).floor();
    if units > u64::MAX as f64 {
        return Err(DashboardError::InvalidInput(format!(
            "fund balance {balance} is out of range"
        )));
    }
    Ok(units as u64)
}
