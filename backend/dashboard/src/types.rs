//! Wire shapes returned by the fund contract and the normalized domain
//! types built from them.
//!
//! The contract's JSON mapping follows protobuf conventions: 64-bit integers
//! arrive as decimal strings, and fields holding their default value (zero,
//! empty list, first enum variant) may be omitted entirely. The `Raw*`
//! structs therefore accept numbers or strings ([`RawInt`]) and default the
//! omissible fields. Nothing here is trusted until `normalize` has parsed it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────
// Raw contract responses
// ─────────────────────────────────────────────────────────

/// An integer as the contract encodes it: a JSON number or a decimal string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawInt {
    Number(serde_json::Number),
    Text(String),
}

impl From<u64> for RawInt {
    fn from(n: u64) -> Self {
        RawInt::Number(n.into())
    }
}

impl From<&str> for RawInt {
    fn from(s: &str) -> Self {
        RawInt::Text(s.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawProject {
    pub id: Option<RawInt>,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub beneficiary: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub monthly_payment: Option<RawInt>,
    pub start_date: Option<RawInt>,
    pub end_date: Option<RawInt>,
    /// Numeric enum value or its lowercase name; omitted when `Upcoming`.
    pub status: Option<Value>,
    #[serde(default)]
    pub votes: Vec<RawInt>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProjectsPage {
    #[serde(default)]
    pub projects: Vec<RawProject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawVote {
    pub project_id: Option<RawInt>,
    pub weight: Option<RawInt>,
    pub expiration: Option<RawInt>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVotesPage {
    #[serde(default)]
    pub votes: Vec<RawVote>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGlobalVars {
    pub total_active_projects: Option<RawInt>,
    pub total_upcoming_projects: Option<RawInt>,
    pub fee_denominator: Option<RawInt>,
    #[serde(default)]
    pub payment_times: Vec<RawInt>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBalance {
    pub value: Option<RawInt>,
}

// ─────────────────────────────────────────────────────────
// Domain types
// ─────────────────────────────────────────────────────────

/// Time-derived project classification, computed by the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Upcoming = 0,
    Active = 1,
    Past = 2,
}

impl ProjectStatus {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Upcoming),
            1 => Some(Self::Active),
            2 => Some(Self::Past),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "upcoming" => Some(Self::Upcoming),
            "active" => Some(Self::Active),
            "past" => Some(Self::Past),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    pub id: u32,
    pub creator: String,
    pub beneficiary: String,
    pub title: String,
    pub description: String,
    /// Smallest token unit (8 implied decimals).
    pub monthly_payment: u64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: ProjectStatus,
    /// One slot per expiration bucket; slot `i` expires in `i + 1` months.
    pub votes: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vote {
    pub project_id: u32,
    /// Units of 5% of the voter's balance, `0..=20`.
    pub weight: u8,
    pub expiration: DateTime<Utc>,
}

impl Vote {
    pub fn percent(&self) -> u8 {
        self.weight * 5
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration < now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalVars {
    pub total_active_projects: u32,
    pub total_upcoming_projects: u32,
    pub fee_denominator: u64,
    pub payment_times: Vec<DateTime<Utc>>,
}

impl GlobalVars {
    /// Projects already competing for funds; the fee is priced on this.
    pub fn project_count(&self) -> u64 {
        u64::from(self.total_active_projects) + u64::from(self.total_upcoming_projects)
    }

    /// Earliest scheduled payout strictly after `now`.
    pub fn next_payment_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.payment_times.iter().copied().filter(|t| *t > now).min()
    }
}

/// Outcome of the next payout for one project, as previewed locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Full,
    Partial,
    None,
}

/// The caller's own vote, evaluated against the clock at fetch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedVote {
    #[serde(flatten)]
    pub vote: Vote,
    pub percent: u8,
    pub expired: bool,
}

/// A project prepared for display. Rebuilt on every fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedProject {
    #[serde(flatten)]
    pub project: Project,
    pub monthly_payment_display: String,
    pub total_votes: u64,
    pub total_votes_display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote: Option<ProcessedVote>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculated_payment: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
}

// ─────────────────────────────────────────────────────────
// Wallet-facing shapes
// ─────────────────────────────────────────────────────────

/// An unsigned contract invocation handed to the wallet for signing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractCall {
    pub contract_id: String,
    pub entry_point: &'static str,
    pub args: Value,
}

/// What the wallet reports after broadcasting a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn raw_project_accepts_omitted_defaults() {
        let raw: RawProject = serde_json::from_value(serde_json::json!({
            "id": 3,
            "title": "Explorer",
            "monthly_payment": "6000000000",
            "start_date": "1704067200000",
            "end_date": "1735689600000"
        }))
        .unwrap();
        assert_eq!(raw.id, Some(RawInt::from(3)));
        assert!(raw.status.is_none());
        assert!(raw.votes.is_empty());
        assert_eq!(raw.monthly_payment, Some(RawInt::from("6000000000")));
    }

    #[test]
    fn status_codes_and_names() {
        assert_eq!(ProjectStatus::from_code(1), Some(ProjectStatus::Active));
        assert_eq!(ProjectStatus::from_code(3), None);
        assert_eq!(ProjectStatus::from_name("PAST"), Some(ProjectStatus::Past));
        assert_eq!(ProjectStatus::Upcoming.code(), 0);
    }

    #[test]
    fn next_payment_time_skips_the_past() {
        let at = |d| Utc.with_ymd_and_hms(2026, d, 1, 0, 0, 0).unwrap();
        let vars = GlobalVars {
            total_active_projects: 2,
            total_upcoming_projects: 3,
            fee_denominator: 1,
            payment_times: vec![at(1), at(12), at(11)],
        };
        assert_eq!(vars.project_count(), 5);
        assert_eq!(vars.next_payment_time(at(6)), Some(at(11)));
        assert_eq!(vars.next_payment_time(at(12)), None);
    }

    #[test]
    fn vote_expiry_is_strict() {
        let t = Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap();
        let vote = Vote {
            project_id: 1,
            weight: 4,
            expiration: t,
        };
        assert_eq!(vote.percent(), 20);
        assert!(!vote.is_expired(t));
        assert!(vote.is_expired(t + chrono::Duration::milliseconds(1)));
    }
}
