//! Input rules for project submissions and votes.

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;

use crate::errors::{DashboardError, FieldError, Result};
use crate::normalize::{parse_token_amount, MAX_VOTE_WEIGHT};

/// Submission form as entered by the user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Token amount, e.g. `"12.5"`.
    #[serde(default)]
    pub monthly_payment: String,
    #[serde(default)]
    pub beneficiary: String,
    /// `YYYY-MM-DD`
    #[serde(default)]
    pub start_date: String,
    /// `YYYY-MM-DD`
    #[serde(default)]
    pub end_date: String,
}

/// A submission that passed every field check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedProject {
    pub title: String,
    pub description: String,
    pub monthly_payment: u64,
    pub beneficiary: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Base58 without `0`, `O`, `I` and `l`.
pub fn is_valid_address(address: &str) -> bool {
    (32..=44).contains(&address.len())
        && address
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() && !matches!(b, b'0' | b'O' | b'I' | b'l'))
}

/// Calendar date → epoch ms at UTC midnight.
pub fn parse_form_date(input: &str) -> Option<i64> {
    let date = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").ok()?;
    Some(date.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
}

impl ProjectForm {
    /// Check every field against `today`, reporting all failures at once.
    pub fn validate(&self, today: NaiveDate) -> Result<ValidatedProject> {
        let mut errors = Vec::new();
        let today_ms = today.and_time(NaiveTime::MIN).and_utc().timestamp_millis();

        if self.title.trim().is_empty() {
            errors.push(FieldError::new("title", "Title is required"));
        }
        if self.description.trim().is_empty() {
            errors.push(FieldError::new("description", "Description is required"));
        }

        let monthly_payment = if self.monthly_payment.trim().is_empty() {
            errors.push(FieldError::new("monthly_payment", "Monthly payment is required"));
            None
        } else {
            match parse_token_amount(&self.monthly_payment) {
                Some(units) if units > 0 => Some(units),
                _ => {
                    errors.push(FieldError::new(
                        "monthly_payment",
                        "Monthly payment must be a positive number with at most 8 decimals",
                    ));
                    None
                }
            }
        };

        let beneficiary = self.beneficiary.trim();
        if beneficiary.is_empty() {
            errors.push(FieldError::new("beneficiary", "Beneficiary address is required"));
        } else if !is_valid_address(beneficiary) {
            errors.push(FieldError::new("beneficiary", "Invalid address format"));
        }

        let start_ms = self.date_field("start_date", "Start date", today_ms, &mut errors);
        let end_ms = self.date_field("end_date", "End date", today_ms, &mut errors);
        if let (Some(start), Some(end)) = (start_ms, end_ms) {
            if end <= start {
                errors.push(FieldError::new(
                    "end_date",
                    "End date must be at least one day after start date",
                ));
            }
        }

        match (monthly_payment, start_ms, end_ms) {
            (Some(monthly_payment), Some(start_ms), Some(end_ms)) if errors.is_empty() => {
                Ok(ValidatedProject {
                    title: self.title.trim().to_string(),
                    description: self.description.trim().to_string(),
                    monthly_payment,
                    beneficiary: beneficiary.to_string(),
                    start_ms,
                    end_ms,
                })
            }
            _ => Err(DashboardError::Validation(errors)),
        }
    }

    fn date_field(
        &self,
        field: &'static str,
        label: &str,
        today_ms: i64,
        errors: &mut Vec<FieldError>,
    ) -> Option<i64> {
        let raw = match field {
            "start_date" => &self.start_date,
            _ => &self.end_date,
        };
        if raw.trim().is_empty() {
            errors.push(FieldError::new(field, format!("{label} is required")));
            return None;
        }
        match parse_form_date(raw) {
            None => {
                errors.push(FieldError::new(field, format!("{label} is not a valid date")));
                None
            }
            Some(ms) if ms < today_ms => {
                errors.push(FieldError::new(field, format!("{label} cannot be in the past")));
                None
            }
            Some(ms) => Some(ms),
        }
    }
}

/// Vote percentage (0–100 in steps of 5) → contract weight (0–20).
pub fn weight_from_percent(percent: u32) -> Result<u8> {
    if percent % 5 != 0 {
        return Err(DashboardError::field(
            "weight",
            "Vote percentage must be a multiple of 5",
        ));
    }
    let weight = percent / 5;
    if weight > u32::from(MAX_VOTE_WEIGHT) {
        return Err(DashboardError::field(
            "weight",
            format!("Vote percentage cannot exceed {}", u32::from(MAX_VOTE_WEIGHT) * 5),
        ));
    }
    Ok(weight as u8)
}

/// Expected expiry of a vote cast at `now`: the day before the first of
/// the month six months ahead. Display only; the contract sets the real one.
pub fn default_vote_expiration(now: DateTime<Utc>) -> NaiveDate {
    let first_of_month = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .unwrap_or_else(|| now.date_naive());
    first_of_month
        .checked_add_months(Months::new(6))
        .and_then(|d| d.pred_opt())
        .unwrap_or(first_of_month)
}

/// Start of the current UTC day.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
