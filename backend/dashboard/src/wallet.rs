//! Wallet session.
//!
//! Keys never enter this service. Account discovery, signing, broadcast and
//! confirmation are delegated to a wallet bridge reached through
//! [`WalletBackend`]. [`Session`] owns the connection lifecycle
//!
//! ```text
//! Disconnected ──connect──► Connecting ──► Connected { address }
//!      ▲                        │
//!      └──── failure ───────────┘
//! Connected ──disconnect──► Disconnected
//! ```
//!
//! and is passed explicitly to whatever needs the connected account.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::errors::{DashboardError, Result};
use crate::types::{ContractCall, TxReceipt};

/// JSON-RPC code a wallet returns when the user declines a request.
const USER_REJECTED: i64 = 4001;

#[async_trait]
pub trait WalletBackend: Send + Sync {
    /// Whether a wallet is present behind the bridge.
    async fn is_installed(&self) -> bool;

    async fn accounts(&self) -> Result<Vec<String>>;

    /// Sign `call` with `signer` and broadcast it.
    async fn send_transaction(&self, signer: &str, call: &ContractCall) -> Result<TxReceipt>;

    /// Resolve once the transaction is included in a block.
    async fn wait(&self, tx_id: &str) -> Result<TxReceipt>;
}

// ─────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected { address: String },
}

/// Snapshot of the session for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub connection: ConnectionState,
    pub is_installed: bool,
    pub error: Option<String>,
}

pub struct Session {
    backend: Arc<dyn WalletBackend>,
    state: RwLock<SessionView>,
    wait_timeout: Duration,
}

impl Session {
    pub fn new(backend: Arc<dyn WalletBackend>, wait_timeout: Duration) -> Self {
        Self {
            backend,
            state: RwLock::new(SessionView {
                connection: ConnectionState::Disconnected,
                is_installed: false,
                error: None,
            }),
            wait_timeout,
        }
    }

    pub async fn view(&self) -> SessionView {
        self.state.read().await.clone()
    }

    /// Address of the connected account, if any.
    pub async fn address(&self) -> Option<String> {
        match &self.state.read().await.connection {
            ConnectionState::Connected { address } => Some(address.clone()),
            _ => None,
        }
    }

    /// Record whether a wallet is reachable, without connecting.
    pub async fn probe(&self) -> bool {
        let installed = self.backend.is_installed().await;
        if !installed {
            warn!("No wallet reachable through the bridge; signing is unavailable");
        }
        self.state.write().await.is_installed = installed;
        installed
    }

    /// Discover accounts and connect to the first one.
    pub async fn connect(&self) -> Result<String> {
        {
            let mut state = self.state.write().await;
            if state.connection == ConnectionState::Connecting {
                return Err(DashboardError::Wallet(
                    "A connection request is already pending".to_string(),
                ));
            }
            state.connection = ConnectionState::Connecting;
            state.error = None;
        }

        let outcome = self.discover().await;

        let mut state = self.state.write().await;
        match outcome {
            Ok((installed, address)) => {
                info!("Wallet connected: {address}");
                state.is_installed = installed;
                state.connection = ConnectionState::Connected {
                    address: address.clone(),
                };
                Ok(address)
            }
            Err((installed, e)) => {
                warn!("Wallet connection failed: {e}");
                state.is_installed = installed;
                state.connection = ConnectionState::Disconnected;
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn discover(&self) -> std::result::Result<(bool, String), (bool, DashboardError)> {
        if !self.backend.is_installed().await {
            return Err((
                false,
                DashboardError::Wallet(
                    "Wallet not found. Install the wallet extension and its bridge.".to_string(),
                ),
            ));
        }
        let accounts = self.backend.accounts().await.map_err(|e| (true, e))?;
        accounts.into_iter().next().map(|a| (true, a)).ok_or((
            true,
            DashboardError::Wallet("No accounts found. Please check your wallet.".to_string()),
        ))
    }

    pub async fn disconnect(&self) {
        let installed = self.backend.is_installed().await;
        let mut state = self.state.write().await;
        *state = SessionView {
            connection: ConnectionState::Disconnected,
            is_installed: installed,
            error: None,
        };
        info!("Wallet disconnected");
    }

    /// Sign and broadcast `call` from the connected account.
    ///
    /// Once this returns `Ok` the transaction is out of our hands: it must
    /// not be sent again, whatever happens while waiting for it.
    pub async fn sign_and_send(&self, call: &ContractCall) -> Result<TxReceipt> {
        let address = self
            .address()
            .await
            .ok_or_else(|| DashboardError::Wallet("Wallet not connected".to_string()))?;
        let receipt = self.backend.send_transaction(&address, call).await?;
        info!("{} broadcast as {}", call.entry_point, receipt.id);
        Ok(receipt)
    }

    /// Wait for a broadcast transaction to be mined. `Ok(None)` means the
    /// configured timeout elapsed first; the transaction may still land.
    pub async fn wait(&self, tx_id: &str) -> Result<Option<TxReceipt>> {
        match tokio::time::timeout(self.wait_timeout, self.backend.wait(tx_id)).await {
            Ok(receipt) => receipt.map(Some),
            Err(_) => {
                warn!("Timed out waiting for transaction {tx_id}");
                Ok(None)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────
// Bridge backend
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    #[serde(default)]
    result: Option<Value>,
    error: Option<BridgeError>,
}

#[derive(Debug, Deserialize)]
struct BridgeError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Account {
    address: String,
}

/// Talks JSON-RPC to a local wallet bridge (`wallet_*` methods).
#[derive(Debug, Clone)]
pub struct BridgeWallet {
    client: Client,
    url: String,
}

impl BridgeWallet {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body: BridgeResponse = self
            .client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = body.error {
            return Err(classify_bridge_error(err));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

/// User rejections and missing accounts are wallet errors; anything the
/// chain refused (reverts) is a contract error.
fn classify_bridge_error(err: BridgeError) -> DashboardError {
    if err.code == USER_REJECTED {
        DashboardError::Wallet(format!("Request rejected: {}", err.message))
    } else if err.message.to_ascii_lowercase().contains("revert") {
        DashboardError::Contract(err.message)
    } else {
        DashboardError::Wallet(format!("{} ({})", err.message, err.code))
    }
}

#[async_trait]
impl WalletBackend for BridgeWallet {
    async fn is_installed(&self) -> bool {
        match self.call("wallet_isInstalled", json!({})).await {
            Ok(v) => v.as_bool().unwrap_or(false),
            Err(e) => {
                warn!("Wallet bridge unreachable: {e}");
                false
            }
        }
    }

    async fn accounts(&self) -> Result<Vec<String>> {
        let value = self.call("wallet_getAccounts", json!({})).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        let accounts: Vec<Account> = serde_json::from_value(value)?;
        Ok(accounts.into_iter().map(|a| a.address).collect())
    }

    async fn send_transaction(&self, signer: &str, call: &ContractCall) -> Result<TxReceipt> {
        let value = self
            .call(
                "wallet_sendTransaction",
                json!({ "signer": signer, "call": call }),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn wait(&self, tx_id: &str) -> Result<TxReceipt> {
        let value = self.call("wallet_wait", json!({ "id": tx_id })).await?;
        Ok(serde_json::from_value(value)?)
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
