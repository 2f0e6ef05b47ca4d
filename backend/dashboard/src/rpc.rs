//! JSON-RPC client for the fund contract and the funding token.
//!
//! Read-only entry points are invoked through the node's `contract_call`
//! method, which returns the decoded JSON result of the call (or `null`).
//! Mutating entry points are never sent from here: [`FundClient::submit_project_call`]
//! and [`FundClient::update_vote_call`] only build the unsigned
//! [`ContractCall`] that the wallet signs and broadcasts.
//!
//! ## Resilience
//!
//! * Reads are idempotent, so transient network failures and rate-limit
//!   responses are retried with exponential back-off, at most
//!   `rpc_max_retries` times, before surfacing [`DashboardError::Network`].
//! * JSON-RPC errors are returned immediately; the node answered.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::errors::{DashboardError, Result};
use crate::normalize::{normalize_global_vars, normalize_project, normalize_vote, parse_u64_or_zero};
use crate::types::{
    ContractCall, GlobalVars, Project, ProjectStatus, RawBalance, RawGlobalVars,
    RawProject, RawProjectsPage, RawVotesPage, Vote,
};

const MAX_BACKOFF_SECS: u64 = 8;
const INITIAL_BACKOFF_MILLIS: u64 = 250;
/// `get_projects` sort key for total vote weight.
const ORDER_BY_VOTES: u8 = 1;

/// Pagination key meaning "from the top" when listing in descending order.
pub fn first_page_start() -> String {
    "9".repeat(30)
}

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Parameters of a `get_projects` listing.
#[derive(Debug, Clone)]
pub struct ProjectQuery {
    pub status: ProjectStatus,
    pub limit: u32,
    pub start: String,
    pub descending: bool,
}

impl ProjectQuery {
    /// First page of `status` projects, ordered by votes, most-voted first.
    pub fn top_voted(status: ProjectStatus, limit: u32) -> Self {
        Self {
            status,
            limit,
            start: first_page_start(),
            descending: true,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FundClient {
    client: Client,
    rpc_url: String,
    fund_contract_id: String,
    token_contract_id: String,
    max_retries: u32,
}

impl FundClient {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            rpc_url: config.rpc_url.clone(),
            fund_contract_id: config.fund_contract_id.clone(),
            token_contract_id: config.token_contract_id.clone(),
            max_retries: config.rpc_max_retries,
        }
    }

    pub fn fund_contract_id(&self) -> &str {
        &self.fund_contract_id
    }

    /// `get_projects`: one page of projects in a given status.
    pub async fn get_projects(&self, query: &ProjectQuery) -> Result<Vec<Project>> {
        let args = json!({
            "status": query.status.code(),
            "order_by": ORDER_BY_VOTES,
            "limit": query.limit,
            "start": query.start,
            "descending": query.descending,
        });
        let page: Option<RawProjectsPage> = self
            .read(&self.fund_contract_id, "get_projects", args)
            .await?;
        let projects = page.unwrap_or_default().projects;
        debug!("Fetched {} {:?} projects", projects.len(), query.status);
        projects.iter().map(normalize_project).collect()
    }

    /// `get_project`: `None` when the contract has no such project.
    pub async fn get_project(&self, project_id: u32) -> Result<Option<Project>> {
        let raw: Option<RawProject> = self
            .read(
                &self.fund_contract_id,
                "get_project",
                json!({ "project_id": project_id }),
            )
            .await?;
        raw.as_ref().map(normalize_project).transpose()
    }

    /// `get_user_votes`: every vote recorded for `voter`.
    pub async fn get_user_votes(&self, voter: &str) -> Result<Vec<Vote>> {
        let page: Option<RawVotesPage> = self
            .read(
                &self.fund_contract_id,
                "get_user_votes",
                json!({ "voter": voter }),
            )
            .await?;
        page.unwrap_or_default().votes.iter().map(normalize_vote).collect()
    }

    /// `get_global_vars`: counters, fee denominator and payout schedule.
    pub async fn get_global_vars(&self) -> Result<GlobalVars> {
        let raw: Option<RawGlobalVars> = self
            .read(&self.fund_contract_id, "get_global_vars", json!({}))
            .await?;
        let raw = raw.ok_or_else(|| {
            DashboardError::Contract("get_global_vars returned no result".to_string())
        })?;
        normalize_global_vars(&raw)
    }

    /// Token `balance_of` for `owner`; the fund's own address by default.
    pub async fn balance_of(&self, owner: &str) -> Result<u64> {
        let raw: Option<RawBalance> = self
            .read(&self.token_contract_id, "balance_of", json!({ "owner": owner }))
            .await?;
        parse_u64_or_zero("value", raw.unwrap_or_default().value.as_ref())
    }

    pub async fn fund_balance(&self) -> Result<u64> {
        self.balance_of(&self.fund_contract_id).await
    }

    /// Unsigned `submit_project` invocation; amounts and dates are sent as
    /// decimal strings like every other 64-bit field.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_project_call(
        &self,
        creator: &str,
        beneficiary: &str,
        title: &str,
        description: &str,
        monthly_payment: u64,
        start_ms: i64,
        end_ms: i64,
        fee: u64,
    ) -> ContractCall {
        ContractCall {
            contract_id: self.fund_contract_id.clone(),
            entry_point: "submit_project",
            args: json!({
                "creator": creator,
                "beneficiary": beneficiary,
                "title": title,
                "description": description,
                "monthly_payment": monthly_payment.to_string(),
                "start_date": start_ms.to_string(),
                "end_date": end_ms.to_string(),
                "fee": fee.to_string(),
            }),
        }
    }

    /// Unsigned `update_vote` invocation. Weight 0 removes the vote.
    pub fn update_vote_call(&self, voter: &str, project_id: u32, weight: u8) -> ContractCall {
        ContractCall {
            contract_id: self.fund_contract_id.clone(),
            entry_point: "update_vote",
            args: json!({
                "voter": voter,
                "project_id": project_id,
                "weight": weight,
            }),
        }
    }

    /// Invoke a read-only entry point and decode its result.
    async fn read<T: DeserializeOwned>(
        &self,
        contract_id: &str,
        entry_point: &str,
        args: Value,
    ) -> Result<Option<T>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "contract_call",
            "params": {
                "contract_id": contract_id,
                "entry_point": entry_point,
                "args": args,
            },
        });

        let mut attempt = 0;
        let mut backoff = Duration::from_millis(INITIAL_BACKOFF_MILLIS);

        loop {
            match self.send_once(&body).await {
                Ok(result) => {
                    return match result {
                        None | Some(Value::Null) => Ok(None),
                        Some(value) => Ok(Some(serde_json::from_value(value)?)),
                    };
                }
                Err(e) if is_transient(&e) && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "{entry_point} failed (attempt {attempt}, retrying in {}ms): {e}",
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(MAX_BACKOFF_SECS));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, body: &Value) -> Result<Option<Value>> {
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;

        let body: RpcResponse = resp.json().await?;
        if let Some(err) = body.error {
            return Err(DashboardError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(body.result)
    }
}

fn is_transient(err: &DashboardError) -> bool {
    match err {
        DashboardError::Network(e) => {
            e.is_timeout()
                || e.is_connect()
                || e.status()
                    .map(|s| s.is_server_error() || s == reqwest::StatusCode::TOO_MANY_REQUESTS)
                    .unwrap_or(false)
        }
        _ => false,
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
