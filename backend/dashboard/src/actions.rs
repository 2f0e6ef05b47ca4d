//! User actions that end in a signed transaction: voting and submitting a
//! project.
//!
//! Each flow validates locally, builds the contract call, has the wallet
//! sign and broadcast it, waits for inclusion, then refetches the dashboard.
//! Nothing is re-sent after a successful broadcast.

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::dashboard::Dashboard;
use crate::errors::{DashboardError, Result};
use crate::fee::submission_fee;
use crate::normalize::format_units;
use crate::rpc::FundClient;
use crate::types::{ContractCall, TxReceipt};
use crate::validation::{default_vote_expiration, weight_from_percent, ProjectForm};
use crate::wallet::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxStatus {
    Confirmed { block_number: Option<u64> },
    /// Broadcast, but not seen in a block before the wait timed out.
    Pending,
}

#[derive(Debug, Clone, Serialize)]
pub struct TxOutcome {
    pub transaction_id: String,
    #[serde(flatten)]
    pub status: TxStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoteOutcome {
    #[serde(flatten)]
    pub transaction: TxOutcome,
    pub percent: u32,
    /// Expected expiry shown to the voter; `None` when the vote was removed.
    pub expected_expiration: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeQuote {
    pub existing_projects: u64,
    pub fee: u64,
    pub fee_display: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub fee: FeeQuote,
    pub transaction: TxOutcome,
}

/// Price a submission for the given date range against current contract state.
pub async fn quote_fee(client: &FundClient, start_ms: i64, end_ms: i64) -> Result<FeeQuote> {
    let vars = client.get_global_vars().await?;
    let existing_projects = vars.project_count();
    let fee = submission_fee(existing_projects, start_ms, end_ms, vars.fee_denominator)?;
    Ok(FeeQuote {
        existing_projects,
        fee,
        fee_display: format_units(fee),
    })
}

/// Set the connected account's vote on `project_id`. `percent == 0` removes it.
pub async fn cast_vote(
    dashboard: &Dashboard,
    session: &Session,
    project_id: u32,
    percent: u32,
) -> Result<VoteOutcome> {
    let weight = weight_from_percent(percent)?;
    let voter = require_address(session).await?;

    let call = dashboard.client().update_vote_call(&voter, project_id, weight);
    let transaction = execute(dashboard, session, &call).await?;
    info!(
        "Vote of {percent}% on project {project_id} by {voter}: {:?}",
        transaction.status
    );

    Ok(VoteOutcome {
        transaction,
        percent,
        expected_expiration: (weight > 0).then(|| default_vote_expiration(Utc::now())),
    })
}

/// Validate, price and submit a new project from the connected account.
pub async fn submit_project(
    dashboard: &Dashboard,
    session: &Session,
    form: &ProjectForm,
    today: NaiveDate,
) -> Result<Submission> {
    let project = form.validate(today)?;
    let creator = require_address(session).await?;
    let fee = quote_fee(dashboard.client(), project.start_ms, project.end_ms).await?;

    let call = dashboard.client().submit_project_call(
        &creator,
        &project.beneficiary,
        &project.title,
        &project.description,
        project.monthly_payment,
        project.start_ms,
        project.end_ms,
        fee.fee,
    );
    let transaction = execute(dashboard, session, &call).await?;
    info!(
        "Project {:?} submitted by {creator} for a fee of {}",
        project.title, fee.fee_display
    );

    Ok(Submission { fee, transaction })
}

async fn require_address(session: &Session) -> Result<String> {
    session
        .address()
        .await
        .ok_or_else(|| DashboardError::Wallet("Please connect your wallet first".into()))
}

/// Sign, broadcast and wait for `call`, then refetch.
///
/// After a successful broadcast the only error returned is a contract
/// revert, tagged with the transaction id. Any other failure while waiting
/// leaves the transaction `Pending`.
async fn execute(
    dashboard: &Dashboard,
    session: &Session,
    call: &ContractCall,
) -> Result<TxOutcome> {
    let TxReceipt { id, .. } = session.sign_and_send(call).await?;
    let waited = session.wait(&id).await;
    refetch(dashboard).await;

    let status = match waited {
        Ok(Some(mined)) => TxStatus::Confirmed {
            block_number: mined.block_number,
        },
        Ok(None) => TxStatus::Pending,
        Err(DashboardError::Contract(reason)) => {
            return Err(DashboardError::Contract(format!("transaction {id} reverted: {reason}")));
        }
        Err(e) => {
            warn!("Could not confirm transaction {id}, reporting it as pending: {e}");
            TxStatus::Pending
        }
    };
    Ok(TxOutcome {
        transaction_id: id,
        status,
    })
}

/// The transaction already happened; a failed refetch is only logged.
async fn refetch(dashboard: &Dashboard) {
    if let Err(e) = dashboard.refresh().await {
        warn!("Refresh after transaction failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::tests::{dashboard_for, mock_entry_point, mock_fund};
    use crate::wallet::tests::FakeWallet;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    async fn connected(wallet: Arc<FakeWallet>) -> Session {
        let session = Session::new(wallet, Duration::from_secs(1));
        session.connect().await.unwrap();
        session
    }

    fn form() -> ProjectForm {
        ProjectForm {
            title: "Explorer".into(),
            description: "Run the block explorer".into(),
            monthly_payment: "60".into(),
            beneficiary: "1NsQbH5AhQXgtSNg1ejpFqTi2hmCWz1eQS".into(),
            start_date: "2026-04-01".into(),
            end_date: "2026-05-01".into(),
        }
    }

    #[tokio::test]
    async fn vote_is_signed_by_connected_account() {
        let mut server = mockito::Server::new_async().await;
        mock_fund(&mut server).await;
        let dashboard = dashboard_for(&server.url());
        let wallet = Arc::new(FakeWallet::with_account("1Voter"));
        let session = connected(wallet.clone()).await;

        let outcome = cast_vote(&dashboard, &session, 2, 25).await.unwrap();
        assert_eq!(
            outcome.transaction.status,
            TxStatus::Confirmed { block_number: Some(100) }
        );
        assert!(outcome.expected_expiration.is_some());

        let sent = wallet.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].1.args,
            json!({ "voter": "1Voter", "project_id": 2, "weight": 5 })
        );
        drop(sent);

        assert!(dashboard.snapshot().await.active.data.is_some());
    }

    #[tokio::test]
    async fn removing_a_vote_has_no_expiration() {
        let mut server = mockito::Server::new_async().await;
        mock_fund(&mut server).await;
        let dashboard = dashboard_for(&server.url());
        let session = connected(Arc::new(FakeWallet::with_account("1Voter"))).await;

        let outcome = cast_vote(&dashboard, &session, 1, 0).await.unwrap();
        assert_eq!(outcome.percent, 0);
        assert!(outcome.expected_expiration.is_none());
    }

    #[tokio::test]
    async fn lost_confirmation_is_pending_not_failed() {
        let mut server = mockito::Server::new_async().await;
        mock_fund(&mut server).await;
        let dashboard = dashboard_for(&server.url());
        let wallet = Arc::new(FakeWallet {
            wait_error: Mutex::new(Some(DashboardError::Rpc {
                code: -32000,
                message: "bridge connection reset".into(),
            })),
            ..FakeWallet::with_account("1Voter")
        });
        let session = connected(wallet.clone()).await;

        let outcome = cast_vote(&dashboard, &session, 2, 25).await.unwrap();
        assert_eq!(outcome.transaction.transaction_id, "0x01");
        assert_eq!(outcome.transaction.status, TxStatus::Pending);
        assert_eq!(wallet.sent.lock().unwrap().len(), 1);
        assert!(dashboard.snapshot().await.active.data.is_some());
    }

    #[tokio::test]
    async fn revert_carries_the_transaction_id() {
        let mut server = mockito::Server::new_async().await;
        mock_fund(&mut server).await;
        let dashboard = dashboard_for(&server.url());
        let wallet = Arc::new(FakeWallet {
            wait_error: Mutex::new(Some(DashboardError::Contract("fee too low".into()))),
            ..FakeWallet::with_account("1Voter")
        });
        let session = connected(wallet).await;

        let err = cast_vote(&dashboard, &session, 2, 25).await.unwrap_err();
        assert_eq!(err.kind(), "contract");
        assert!(err.to_string().contains("transaction 0x01 reverted: fee too low"));
        assert!(dashboard.snapshot().await.active.data.is_some());
    }

    #[tokio::test]
    async fn invalid_vote_never_reaches_the_wallet() {
        let dashboard = dashboard_for("http://unused");
        let wallet = Arc::new(FakeWallet::with_account("1Voter"));
        let session = connected(wallet.clone()).await;

        let err = cast_vote(&dashboard, &session, 2, 33).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(wallet.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disconnected_session_cannot_vote() {
        let dashboard = dashboard_for("http://unused");
        let session = Session::new(
            Arc::new(FakeWallet::with_account("1Voter")),
            Duration::from_secs(1),
        );
        let err = cast_vote(&dashboard, &session, 2, 50).await.unwrap_err();
        assert!(matches!(err, DashboardError::Wallet(_)));
    }

    #[tokio::test]
    async fn submission_carries_the_quoted_fee() {
        let mut server = mockito::Server::new_async().await;
        mock_fund(&mut server).await;
        let dashboard = dashboard_for(&server.url());
        let wallet = Arc::new(FakeWallet::with_account("1Creator"));
        let session = connected(wallet.clone()).await;

        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let submission = submit_project(&dashboard, &session, &form(), today)
            .await
            .unwrap();

        // 3 existing projects → p = 4; 64 * 30 days in ms / 1_000_000
        assert_eq!(submission.fee.existing_projects, 3);
        assert_eq!(submission.fee.fee, 165_888);

        let sent = wallet.sent.lock().unwrap();
        let args = &sent[0].1.args;
        assert_eq!(sent[0].1.entry_point, "submit_project");
        assert_eq!(args["creator"], "1Creator");
        assert_eq!(args["monthly_payment"], "6000000000");
        assert_eq!(args["fee"], "165888");
    }

    #[tokio::test]
    async fn rejected_signature_is_a_wallet_error() {
        let mut server = mockito::Server::new_async().await;
        mock_fund(&mut server).await;
        let dashboard = dashboard_for(&server.url());
        let wallet = Arc::new(FakeWallet {
            reject: true,
            ..FakeWallet::with_account("1Creator")
        });
        let session = connected(wallet).await;

        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let err = submit_project(&dashboard, &session, &form(), today)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "wallet");
    }

    #[tokio::test]
    async fn zero_fee_denominator_blocks_the_quote() {
        let mut server = mockito::Server::new_async().await;
        mock_entry_point(
            &mut server,
            "get_global_vars",
            None,
            json!({ "total_active_projects": 1 }),
        )
        .await;
        let dashboard = dashboard_for(&server.url());
        let err = quote_fee(dashboard.client(), 0, 1_000).await.unwrap_err();
        assert!(matches!(err, DashboardError::Config(_)));
    }
}
