//! In-memory dashboard snapshot and the fetch cycles that rebuild it.
//!
//! Three categories are fetched independently: active projects (with the
//! payout preview), upcoming projects, and the fund's global variables.
//! Each cycle moves its category through
//! `Idle → Loading → Success | Failure`.
//!
//! Cycles can overlap (the periodic refresh, a post-vote refresh, a wallet
//! change). Every cycle takes a ticket from its category's
//! [`RequestSequencer`] and its result is written only if no newer cycle for
//! the same category has started since. Late results from superseded cycles
//! are dropped.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::{DashboardError, Result};
use crate::estimator;
use crate::normalize::{format_units, process_project};
use crate::rpc::{FundClient, ProjectQuery};
use crate::types::{GlobalVars, ProcessedProject, Project, ProjectStatus, Vote};

// ─────────────────────────────────────────────────────────
// Sequencing
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Hands out monotonically increasing tickets for one data category.
#[derive(Debug, Default)]
pub struct RequestSequencer {
    latest: AtomicU64,
}

impl RequestSequencer {
    pub fn issue(&self) -> Ticket {
        Ticket(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// True while no ticket newer than `ticket` has been issued.
    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.0
    }
}

// ─────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FetchState {
    Idle,
    Loading,
    Success { at: DateTime<Utc> },
    Failure { error: String, at: DateTime<Utc> },
}

/// One category of the snapshot. A failed cycle keeps the last good data.
#[derive(Debug, Clone, Serialize)]
pub struct Slot<T> {
    pub fetch: FetchState,
    pub data: Option<T>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            fetch: FetchState::Idle,
            data: None,
        }
    }
}

impl<T> Slot<T> {
    fn begin(&mut self) {
        self.fetch = FetchState::Loading;
    }

    fn succeed(&mut self, data: T, at: DateTime<Utc>) {
        self.fetch = FetchState::Success { at };
        self.data = Some(data);
    }

    fn fail(&mut self, error: String, at: DateTime<Utc>) {
        self.fetch = FetchState::Failure { error, at };
    }
}

/// Active projects with their previewed share of the next payout.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutPreview {
    pub fund_balance: u64,
    pub fund_balance_display: String,
    /// Most-voted first, the order in which the payout serves them.
    pub projects: Vec<ProcessedProject>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FundInfo {
    #[serde(flatten)]
    pub global_vars: GlobalVars,
    pub next_payment_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub viewer: Option<String>,
    pub active: Slot<PayoutPreview>,
    pub upcoming: Slot<Vec<ProcessedProject>>,
    pub fund: Slot<FundInfo>,
}

#[derive(Debug, Clone, Copy)]
enum Category {
    Active,
    Upcoming,
    Fund,
}

// ─────────────────────────────────────────────────────────
// Dashboard
// ─────────────────────────────────────────────────────────

pub struct Dashboard {
    client: FundClient,
    page_size: u32,
    snapshot: RwLock<Snapshot>,
    active_seq: RequestSequencer,
    upcoming_seq: RequestSequencer,
    fund_seq: RequestSequencer,
}

impl Dashboard {
    pub fn new(client: FundClient, page_size: u32) -> Self {
        Self {
            client,
            page_size,
            snapshot: RwLock::new(Snapshot::default()),
            active_seq: RequestSequencer::default(),
            upcoming_seq: RequestSequencer::default(),
            fund_seq: RequestSequencer::default(),
        }
    }

    pub fn client(&self) -> &FundClient {
        &self.client
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.snapshot.read().await.clone()
    }

    /// Change whose votes are attached to projects, then refetch.
    pub async fn set_viewer(&self, viewer: Option<String>) -> Result<()> {
        let changed = {
            let mut snapshot = self.snapshot.write().await;
            let changed = snapshot.viewer != viewer;
            snapshot.viewer = viewer;
            changed
        };
        if changed {
            self.refresh().await?;
        }
        Ok(())
    }

    /// Run one fetch cycle for every category concurrently.
    ///
    /// Each category records its own outcome; the first error is returned.
    pub async fn refresh(&self) -> Result<()> {
        let viewer = self.snapshot.read().await.viewer.clone();
        let viewer = viewer.as_deref();

        let (active, upcoming, fund) = tokio::join!(
            self.cycle(Category::Active, |s| &mut s.active, self.load_active(viewer)),
            self.cycle(Category::Upcoming, |s| &mut s.upcoming, self.load_upcoming(viewer)),
            self.cycle(Category::Fund, |s| &mut s.fund, self.load_fund()),
        );
        active.and(upcoming).and(fund)
    }

    /// A single project with the viewer's vote and, when active, the payout
    /// figure from the latest preview.
    ///
    /// The payout is only known for projects on the loaded preview page (the
    /// top `page_size` by votes). Before the first refresh, or for an active
    /// project ranked below that page, `calculated_payment` and
    /// `payment_status` are left out.
    pub async fn project_detail(
        &self,
        project_id: u32,
        viewer: Option<&str>,
    ) -> Result<ProcessedProject> {
        let (project, votes) = tokio::try_join!(
            self.client.get_project(project_id),
            self.votes_of(viewer)
        )?;
        let project = project
            .ok_or_else(|| DashboardError::NotFound(format!("project {project_id}")))?;
        let mut processed = process_project(project, own_vote(&votes, project_id), Utc::now())?;

        if processed.project.status == ProjectStatus::Active {
            let snapshot = self.snapshot.read().await;
            if let Some(previewed) = snapshot
                .active
                .data
                .as_ref()
                .and_then(|p| p.projects.iter().find(|p| p.project.id == project_id))
            {
                processed.calculated_payment = previewed.calculated_payment;
                processed.payment_status = previewed.payment_status;
            }
        }
        Ok(processed)
    }

    /// Re-run the payout preview on the latest active projects against a
    /// hypothetical fund balance. Nothing is fetched.
    pub async fn preview_with_balance(&self, fund_balance: u64) -> Result<PayoutPreview> {
        let projects = self
            .snapshot
            .read()
            .await
            .active
            .data
            .as_ref()
            .map(|p| p.projects.clone())
            .ok_or_else(|| {
                DashboardError::NotFound("active projects have not been loaded yet".to_string())
            })?;
        Ok(PayoutPreview {
            fund_balance,
            fund_balance_display: format_units(fund_balance),
            projects: estimator::estimate(projects, fund_balance)?,
        })
    }

    async fn cycle<T, F>(
        &self,
        category: Category,
        slot: fn(&mut Snapshot) -> &mut Slot<T>,
        fetch: F,
    ) -> Result<()>
    where
        F: Future<Output = Result<T>>,
    {
        let sequencer = self.sequencer(category);
        let ticket = sequencer.issue();
        slot(&mut *self.snapshot.write().await).begin();

        let outcome = fetch.await;

        let mut snapshot = self.snapshot.write().await;
        if !sequencer.is_current(ticket) {
            debug!("Dropping stale {category:?} result (ticket {})", ticket.0);
            return Ok(());
        }
        let now = Utc::now();
        match outcome {
            Ok(data) => {
                slot(&mut snapshot).succeed(data, now);
                Ok(())
            }
            Err(e) => {
                slot(&mut snapshot).fail(e.to_string(), now);
                Err(e)
            }
        }
    }

    fn sequencer(&self, category: Category) -> &RequestSequencer {
        match category {
            Category::Active => &self.active_seq,
            Category::Upcoming => &self.upcoming_seq,
            Category::Fund => &self.fund_seq,
        }
    }

    async fn load_active(&self, viewer: Option<&str>) -> Result<PayoutPreview> {
        let query = ProjectQuery::top_voted(ProjectStatus::Active, self.page_size);
        let (projects, votes, balance) = tokio::try_join!(
            self.client.get_projects(&query),
            self.votes_of(viewer),
            self.client.fund_balance()
        )?;
        let projects = estimator::estimate(process_all(projects, &votes)?, balance)?;
        debug!(
            "Previewed payout of {} across {} active projects",
            format_units(balance),
            projects.len()
        );
        Ok(PayoutPreview {
            fund_balance: balance,
            fund_balance_display: format_units(balance),
            projects,
        })
    }

    async fn load_upcoming(&self, viewer: Option<&str>) -> Result<Vec<ProcessedProject>> {
        let query = ProjectQuery::top_voted(ProjectStatus::Upcoming, self.page_size);
        let (projects, votes) =
            tokio::try_join!(self.client.get_projects(&query), self.votes_of(viewer))?;
        process_all(projects, &votes)
    }

    async fn load_fund(&self) -> Result<FundInfo> {
        let global_vars = self.client.get_global_vars().await?;
        Ok(FundInfo {
            next_payment_time: global_vars.next_payment_time(Utc::now()),
            global_vars,
        })
    }

    async fn votes_of(&self, viewer: Option<&str>) -> Result<Vec<Vote>> {
        match viewer {
            Some(address) => self.client.get_user_votes(address).await,
            None => Ok(Vec::new()),
        }
    }
}

fn own_vote(votes: &[Vote], project_id: u32) -> Option<Vote> {
    votes.iter().find(|v| v.project_id == project_id).cloned()
}

fn process_all(projects: Vec<Project>, votes: &[Vote]) -> Result<Vec<ProcessedProject>> {
    let now = Utc::now();
    projects
        .into_iter()
        .map(|p| {
            let vote = own_vote(votes, p.id);
            process_project(p, vote, now)
        })
        .collect()
}

/// Refresh the snapshot every `interval` until `shutdown` fires.
pub async fn run(dashboard: Arc<Dashboard>, interval: Duration, shutdown: CancellationToken) {
    info!(
        "Dashboard refresher starting, fund contract: {}",
        dashboard.client().fund_contract_id()
    );

    loop {
        if let Err(e) = dashboard.refresh().await {
            error!("Dashboard refresh error: {e}");
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Dashboard refresher stopped");
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::PaymentStatus;
    use mockito::Matcher;
    use reqwest::Client;
    use serde_json::{json, Value};

    pub async fn mock_entry_point(
        server: &mut mockito::ServerGuard,
        entry_point: &str,
        args: Option<Value>,
        result: Value,
    ) -> mockito::Mock {
        let mut params = json!({ "entry_point": entry_point });
        if let Some(args) = args {
            params["args"] = args;
        }
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "params": params })))
            .with_header("content-type", "application/json")
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string())
            .create_async()
            .await
    }

    pub async fn mock_fund(server: &mut mockito::ServerGuard) {
        mock_entry_point(
            server,
            "get_projects",
            Some(json!({ "status": 1 })),
            json!({ "projects": [
                {
                    "id": 2, "title": "B", "monthly_payment": "6000000000",
                    "start_date": "1704067200000", "end_date": "1893456000000",
                    "status": 1, "votes": ["30"]
                },
                {
                    "id": 1, "title": "A", "monthly_payment": "6000000000",
                    "start_date": "1704067200000", "end_date": "1893456000000",
                    "status": 1, "votes": ["20", "30"]
                }
            ]}),
        )
        .await;
        mock_entry_point(
            server,
            "get_projects",
            Some(json!({ "status": 0 })),
            json!({ "projects": [
                {
                    "id": 3, "title": "C", "monthly_payment": "100000000",
                    "start_date": "1893456000000", "end_date": "1924992000000"
                }
            ]}),
        )
        .await;
        mock_entry_point(
            server,
            "get_user_votes",
            None,
            json!({ "votes": [
                { "project_id": 1, "weight": 4, "expiration": "1000" }
            ]}),
        )
        .await;
        mock_entry_point(
            server,
            "balance_of",
            None,
            json!({ "value": "10000000000" }),
        )
        .await;
        mock_entry_point(
            server,
            "get_global_vars",
            None,
            json!({
                "total_active_projects": 2,
                "total_upcoming_projects": 1,
                "fee_denominator": "1000000",
                "payment_times": ["1000", "4102444800000"]
            }),
        )
        .await;
    }

    pub fn dashboard_for(url: &str) -> Dashboard {
        let config = Config::for_tests(url);
        Dashboard::new(FundClient::new(Client::new(), &config), config.page_size)
    }

    #[test]
    fn sequencer_only_honours_latest_ticket() {
        let seq = RequestSequencer::default();
        let first = seq.issue();
        assert!(seq.is_current(first));
        let second = seq.issue();
        assert!(!seq.is_current(first));
        assert!(seq.is_current(second));
    }

    #[tokio::test]
    async fn refresh_builds_payout_preview() {
        let mut server = mockito::Server::new_async().await;
        mock_fund(&mut server).await;
        let dashboard = dashboard_for(&server.url());

        dashboard.refresh().await.unwrap();
        let snapshot = dashboard.snapshot().await;

        let preview = snapshot.active.data.unwrap();
        assert_eq!(preview.fund_balance_display, "100.00000000");
        let outcome: Vec<_> = preview
            .projects
            .iter()
            .map(|p| (p.project.id, p.calculated_payment, p.payment_status))
            .collect();
        assert_eq!(
            outcome,
            vec![
                (1, Some(6_000_000_000), Some(PaymentStatus::Full)),
                (2, Some(4_000_000_000), Some(PaymentStatus::Partial)),
            ]
        );
        assert!(preview.projects[0].vote.is_none());

        let upcoming = snapshot.upcoming.data.unwrap();
        assert_eq!(upcoming[0].project.status, ProjectStatus::Upcoming);
        assert!(upcoming[0].calculated_payment.is_none());

        let fund = snapshot.fund.data.unwrap();
        assert_eq!(fund.global_vars.project_count(), 3);
        assert_eq!(
            fund.next_payment_time.map(|t| t.timestamp_millis()),
            Some(4_102_444_800_000)
        );
        assert!(matches!(snapshot.fund.fetch, FetchState::Success { .. }));
    }

    #[tokio::test]
    async fn viewer_votes_are_attached() {
        let mut server = mockito::Server::new_async().await;
        mock_fund(&mut server).await;
        let dashboard = dashboard_for(&server.url());

        dashboard.set_viewer(Some("1Voter".into())).await.unwrap();
        let snapshot = dashboard.snapshot().await;
        let preview = snapshot.active.data.unwrap();
        let voted = preview.projects.iter().find(|p| p.project.id == 1).unwrap();
        let vote = voted.vote.as_ref().unwrap();
        assert_eq!(vote.percent, 20);
        assert!(vote.expired);
    }

    #[tokio::test]
    async fn what_if_preview_uses_loaded_projects() {
        let mut server = mockito::Server::new_async().await;
        mock_fund(&mut server).await;
        let dashboard = dashboard_for(&server.url());
        let err = dashboard.preview_with_balance(1).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");

        dashboard.refresh().await.unwrap();
        let preview = dashboard.preview_with_balance(15_000_000_000).await.unwrap();
        let paid: Vec<_> = preview
            .projects
            .iter()
            .map(|p| (p.project.id, p.calculated_payment))
            .collect();
        assert_eq!(paid, vec![(1, Some(6_000_000_000)), (2, Some(6_000_000_000))]);
        assert_eq!(preview.fund_balance_display, "150.00000000");
    }

    #[tokio::test]
    async fn detail_outside_preview_has_no_payout() {
        let mut server = mockito::Server::new_async().await;
        mock_entry_point(
            &mut server,
            "get_project",
            None,
            json!({
                "id": 1, "title": "A", "monthly_payment": "6000000000",
                "start_date": "1704067200000", "end_date": "1893456000000",
                "status": 1, "votes": ["20", "30"]
            }),
        )
        .await;
        let dashboard = dashboard_for(&server.url());

        let detail = dashboard.project_detail(1, None).await.unwrap();
        assert_eq!(detail.project.status, ProjectStatus::Active);
        assert!(detail.calculated_payment.is_none());
        assert!(detail.payment_status.is_none());
    }

    #[tokio::test]
    async fn failed_cycle_keeps_previous_data() {
        let dashboard = dashboard_for("http://127.0.0.1:9");
        {
            let mut snapshot = dashboard.snapshot.write().await;
            snapshot.upcoming.succeed(Vec::new(), Utc::now());
        }
        assert!(dashboard.refresh().await.is_err());
        let snapshot = dashboard.snapshot().await;
        assert!(matches!(snapshot.upcoming.fetch, FetchState::Failure { .. }));
        assert_eq!(snapshot.upcoming.data.map(|d| d.len()), Some(0));
        assert!(snapshot.active.data.is_none());
    }

    #[tokio::test]
    async fn stale_cycle_result_is_dropped() {
        let dashboard = dashboard_for("http://unused");
        let slow = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, DashboardError>(Vec::new())
        };
        let fast = async { Ok::<_, DashboardError>(vec![process_fixture()]) };

        let (first, second) = tokio::join!(
            dashboard.cycle(Category::Upcoming, |s| &mut s.upcoming, slow),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                dashboard
                    .cycle(Category::Upcoming, |s| &mut s.upcoming, fast)
                    .await
            }
        );
        first.unwrap();
        second.unwrap();

        let snapshot = dashboard.snapshot().await;
        assert_eq!(snapshot.upcoming.data.unwrap().len(), 1);
    }

    fn process_fixture() -> ProcessedProject {
        let now = Utc::now();
        process_project(
            Project {
                id: 5,
                creator: String::new(),
                beneficiary: String::new(),
                title: "fixture".into(),
                description: String::new(),
                monthly_payment: 1,
                start_date: now,
                end_date: now,
                status: ProjectStatus::Upcoming,
                votes: vec![],
            },
            None,
            now,
        )
        .unwrap()
    }
}
