//! Raw contract values → typed domain values.
//!
//! Every numeric field is parsed strictly. A malformed value fails the whole
//! record with [`DashboardError::Parse`] naming the field, instead of being
//! coerced to zero.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::{DashboardError, Result};
use crate::types::{
    GlobalVars, Project, ProjectStatus, ProcessedProject, ProcessedVote, RawGlobalVars, RawInt,
    RawProject, RawVote, Vote,
};

/// Implied decimal digits of the funding token.
pub const DECIMALS: usize = 8;
/// Smallest units per whole token.
pub const UNITS_PER_TOKEN: u64 = 100_000_000;
/// Highest vote weight the contract accepts (20 × 5% = 100%).
pub const MAX_VOTE_WEIGHT: u8 = 20;

// ─────────────────────────────────────────────────────────
// Scalars
// ─────────────────────────────────────────────────────────

pub fn parse_u64(field: &str, raw: &RawInt) -> Result<u64> {
    match raw {
        RawInt::Number(n) => n.as_u64().ok_or_else(|| {
            DashboardError::Parse(format!("{field}: {n} is not an unsigned integer"))
        }),
        RawInt::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
                return Err(DashboardError::Parse(format!(
                    "{field}: {s:?} is not an unsigned integer"
                )));
            }
            trimmed
                .parse()
                .map_err(|_| DashboardError::Parse(format!("{field}: {s:?} is out of range")))
        }
    }
}

/// Parse an omissible integer; protobuf leaves out zero values.
pub fn parse_u64_or_zero(field: &str, raw: Option<&RawInt>) -> Result<u64> {
    raw.map_or(Ok(0), |r| parse_u64(field, r))
}

fn parse_u32(field: &str, raw: &RawInt) -> Result<u32> {
    let value = parse_u64(field, raw)?;
    u32::try_from(value)
        .map_err(|_| DashboardError::Parse(format!("{field}: {value} is out of range")))
}

fn parse_optional_u32(field: &str, raw: Option<&RawInt>) -> Result<u32> {
    raw.map_or(Ok(0), |r| parse_u32(field, r))
}

/// Epoch milliseconds → UTC timestamp.
pub fn parse_timestamp(field: &str, raw: &RawInt) -> Result<DateTime<Utc>> {
    let ms = parse_u64(field, raw)?;
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| DashboardError::Parse(format!("{field}: {ms} is not a valid timestamp")))
}

fn required<'a>(field: &str, raw: Option<&'a RawInt>) -> Result<&'a RawInt> {
    raw.ok_or_else(|| DashboardError::Parse(format!("{field}: missing")))
}

fn parse_status(raw: Option<&Value>) -> Result<ProjectStatus> {
    let status = match raw {
        None | Some(Value::Null) => Some(ProjectStatus::Upcoming),
        Some(Value::Number(n)) => n.as_u64().and_then(ProjectStatus::from_code),
        Some(Value::String(s)) => ProjectStatus::from_name(s)
            .or_else(|| s.parse::<u64>().ok().and_then(ProjectStatus::from_code)),
        Some(_) => None,
    };
    status.ok_or_else(|| DashboardError::Parse(format!("status: unknown value {raw:?}")))
}

/// Render a smallest-unit amount with exactly [`DECIMALS`] fractional digits.
pub fn format_units(units: u64) -> String {
    format!(
        "{}.{:0width$}",
        units / UNITS_PER_TOKEN,
        units % UNITS_PER_TOKEN,
        width = DECIMALS
    )
}

/// Parse a user-entered token amount ("12.5") into smallest units without
/// going through floating point.
pub fn parse_token_amount(input: &str) -> Option<u64> {
    let input = input.trim();
    let (whole, frac) = match input.split_once('.') {
        Some((w, f)) => (w, f),
        None => (input, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if frac.len() > DECIMALS
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !frac.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac: u64 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<width$}", width = DECIMALS).parse().ok()?
    };
    whole.checked_mul(UNITS_PER_TOKEN)?.checked_add(frac)
}

// ─────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────

pub fn normalize_project(raw: &RawProject) -> Result<Project> {
    let id = parse_optional_u32("id", raw.id.as_ref())?;
    let votes = raw
        .votes
        .iter()
        .map(|v| parse_u64("votes", v))
        .collect::<Result<Vec<_>>>()
        .map_err(|e| DashboardError::Parse(format!("project {id}: {}", strip_prefix(&e))))?;

    let in_project = |e: DashboardError| {
        DashboardError::Parse(format!("project {id}: {}", strip_prefix(&e)))
    };

    Ok(Project {
        id,
        creator: raw.creator.clone(),
        beneficiary: raw.beneficiary.clone(),
        title: raw.title.clone(),
        description: raw.description.clone(),
        monthly_payment: parse_u64_or_zero("monthly_payment", raw.monthly_payment.as_ref())
            .map_err(in_project)?,
        start_date: parse_timestamp(
            "start_date",
            required("start_date", raw.start_date.as_ref()).map_err(in_project)?,
        )
        .map_err(in_project)?,
        end_date: parse_timestamp(
            "end_date",
            required("end_date", raw.end_date.as_ref()).map_err(in_project)?,
        )
        .map_err(in_project)?,
        status: parse_status(raw.status.as_ref()).map_err(in_project)?,
        votes,
    })
}

pub fn normalize_vote(raw: &RawVote) -> Result<Vote> {
    let project_id = parse_optional_u32("project_id", raw.project_id.as_ref())?;
    let weight = parse_u64_or_zero("weight", raw.weight.as_ref())?;
    if weight > u64::from(MAX_VOTE_WEIGHT) {
        return Err(DashboardError::Parse(format!(
            "weight: {weight} exceeds {MAX_VOTE_WEIGHT}"
        )));
    }
    let expiration = parse_timestamp(
        "expiration",
        required("expiration", raw.expiration.as_ref())?,
    )?;
    Ok(Vote {
        project_id,
        weight: weight as u8,
        expiration,
    })
}

pub fn normalize_global_vars(raw: &RawGlobalVars) -> Result<GlobalVars> {
    Ok(GlobalVars {
        total_active_projects: parse_optional_u32(
            "total_active_projects",
            raw.total_active_projects.as_ref(),
        )?,
        total_upcoming_projects: parse_optional_u32(
            "total_upcoming_projects",
            raw.total_upcoming_projects.as_ref(),
        )?,
        fee_denominator: parse_u64_or_zero("fee_denominator", raw.fee_denominator.as_ref())?,
        payment_times: raw
            .payment_times
            .iter()
            .map(|t| parse_timestamp("payment_times", t))
            .collect::<Result<_>>()?,
    })
}

/// Sum of a project's vote buckets.
pub fn total_votes(project: &Project) -> Result<u64> {
    project.votes.iter().try_fold(0u64, |acc, v| {
        acc.checked_add(*v).ok_or_else(|| {
            DashboardError::Parse(format!("project {}: total votes overflow", project.id))
        })
    })
}

/// Build the display form of a project, attaching the caller's vote if any.
pub fn process_project(
    project: Project,
    vote: Option<Vote>,
    now: DateTime<Utc>,
) -> Result<ProcessedProject> {
    let total = total_votes(&project)?;
    Ok(ProcessedProject {
        monthly_payment_display: format_units(project.monthly_payment),
        total_votes: total,
        total_votes_display: format_units(total),
        vote: vote.map(|v| process_vote(v, now)),
        calculated_payment: None,
        payment_status: None,
        project,
    })
}

pub fn process_vote(vote: Vote, now: DateTime<Utc>) -> ProcessedVote {
    ProcessedVote {
        percent: vote.percent(),
        expired: vote.is_expired(now),
        vote,
    }
}

fn strip_prefix(err: &DashboardError) -> String {
    match err {
        DashboardError::Parse(msg) => msg.clone(),
        other => other.to_string(),
    }
}
