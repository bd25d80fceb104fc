//! REST API handlers for the relay service

use crate::api::websocket::{WsBroadcaster, WsEvent};
use crate::crypto::{encode_prefixed, hex_bytes, Address, H256};
use crate::ledger::{format_ether, wei_string, Receipt, ReceiptKind, SignedTransfer};
use crate::safe::{
    decode_signatures, safe_text_message_hash, MessageStatus, OwnerSignature, SafeAccount,
    SafeConfig, SafeTransactionData, SignatureKind,
};
use crate::service::{
    Dispatcher, ErrorKind, PendingMessage, PendingTransaction, Proposal, ServiceError,
    SignatureOutcome, TransactionService, TransactionStatus,
};
use crate::storage::{PersistedState, Storage};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<TransactionService>,
    pub dispatcher: Dispatcher,
    /// `None` keeps everything in memory
    pub storage: Option<Arc<Storage>>,
    pub ws_broadcaster: Arc<WsBroadcaster>,
    /// Held from snapshot to rename, so a later save never loses to an earlier one
    persist_lock: Arc<Mutex<()>>,
}

impl ApiState {
    pub fn new(service: Arc<TransactionService>, storage: Option<Arc<Storage>>) -> Self {
        Self {
            dispatcher: Dispatcher::new(service.clone()),
            service,
            storage,
            ws_broadcaster: Arc::new(WsBroadcaster::new()),
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Write ledger and relay state to disk
    ///
    /// The relay snapshot is taken before the ledger copy, so the ledger is
    /// never older than the envelopes saved with it.
    pub async fn persist(&self) {
        let Some(storage) = &self.storage else {
            return;
        };

        let _guard = self.persist_lock.lock().await;
        let snapshot = self.service.snapshot().await;
        let ledger = self.service.ledger().read().await.clone();
        let state = PersistedState::new(ledger, snapshot);

        let storage = storage.clone();
        match tokio::task::spawn_blocking(move || storage.save(&state)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("Failed to save state: {}", e),
            Err(e) => log::error!("State save task failed: {}", e),
        }
    }
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub kind: ErrorKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AboutResponse {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub auto_execute: bool,
    pub block_number: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SafeResponse {
    pub address: Address,
    pub owners: Vec<Address>,
    pub threshold: u32,
    pub nonce: u64,
    pub salt_nonce: u64,
    /// Wei
    #[serde(with = "wei_string")]
    pub balance: u128,
    pub description: String,
    pub deployer: Address,
    pub deployed_at: DateTime<Utc>,
}

impl SafeResponse {
    fn new(safe: &SafeAccount, balance: u128) -> Self {
        Self {
            address: safe.address,
            owners: safe.owners().to_vec(),
            threshold: safe.threshold(),
            nonce: safe.nonce,
            salt_nonce: safe.config.salt_nonce,
            balance,
            description: safe.description(),
            deployer: safe.deployer,
            deployed_at: safe.deployed_at,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployResponse {
    pub safe: SafeResponse,
    pub receipt: Receipt,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub address: Address,
    /// Wei
    #[serde(with = "wei_string")]
    pub balance: u128,
    /// Ether, decimal
    pub formatted: String,
    /// Next transfer nonce of the account
    pub nonce: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfirmationResponse {
    pub owner: Address,
    /// `ecdsa` or `contract`
    pub signature_type: String,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
    pub submitted_at: DateTime<Utc>,
}

impl From<&OwnerSignature> for ConfirmationResponse {
    fn from(sig: &OwnerSignature) -> Self {
        let (signature_type, data) = match &sig.kind {
            SignatureKind::Ecdsa { data } => ("ecdsa", data),
            SignatureKind::Contract { data } => ("contract", data),
        };
        Self {
            owner: sig.signer,
            signature_type: signature_type.to_string(),
            signature: data.clone(),
            submitted_at: sig.signed_at,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub safe: Address,
    pub safe_tx_hash: H256,
    pub transaction: SafeTransactionData,
    pub proposer: Address,
    pub confirmations_required: u32,
    pub confirmations: Vec<ConfirmationResponse>,
    pub status: TransactionStatus,
    pub submitted_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub execution: Option<Receipt>,
}

impl From<&PendingTransaction> for TransactionResponse {
    fn from(tx: &PendingTransaction) -> Self {
        Self {
            safe: tx.safe,
            safe_tx_hash: tx.safe_tx_hash,
            transaction: tx.data.clone(),
            proposer: tx.proposer,
            confirmations_required: tx.threshold,
            confirmations: tx.signatures().iter().map(ConfirmationResponse::from).collect(),
            status: tx.status,
            submitted_at: tx.submitted_at,
            modified_at: tx.modified_at,
            execution: tx.execution.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfirmResponse {
    pub transaction: TransactionResponse,
    pub outcome: SignatureOutcome,
    /// Set when this confirmation triggered execution
    pub execution: Option<Receipt>,
    pub execution_error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub safe: Address,
    pub message: String,
    pub message_hash: H256,
    pub proposer: Address,
    pub confirmations_required: u32,
    pub confirmations: Vec<ConfirmationResponse>,
    pub status: MessageStatus,
    /// Packed owner signatures, once confirmed
    pub prepared_signature: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl From<&PendingMessage> for MessageResponse {
    fn from(msg: &PendingMessage) -> Self {
        Self {
            safe: msg.safe,
            message: msg.message.clone(),
            message_hash: msg.message_hash,
            proposer: msg.proposer,
            confirmations_required: msg.threshold,
            confirmations: msg
                .confirmations
                .signatures()
                .iter()
                .map(ConfirmationResponse::from)
                .collect(),
            status: msg.status(),
            prepared_signature: msg.prepared_signature().map(|bytes| encode_prefixed(&bytes)),
            created_at: msg.created_at,
            modified_at: msg.modified_at,
        }
    }
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeploySafeRequest {
    pub owners: Vec<Address>,
    pub threshold: u32,
    #[serde(default)]
    pub salt_nonce: u64,
    pub deployer: Address,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FaucetRequest {
    pub address: Address,
    /// Wei
    #[serde(with = "wei_string")]
    pub amount: u128,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposeTransactionRequest {
    pub transaction: SafeTransactionData,
    pub safe_tx_hash: H256,
    pub sender: Address,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignatureRequest {
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub executor: Address,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    pub message: String,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

// ============================================================================
// Error helpers
// ============================================================================

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::MalformedInput => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ThresholdUnmet | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::ExecutionReverted => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn service_error(e: ServiceError) -> (StatusCode, Json<ApiError>) {
    let kind = e.kind();
    (
        status_for(kind),
        Json(ApiError {
            error: e.to_string(),
            kind,
        }),
    )
}

fn bad_request(error: String) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            error,
            kind: ErrorKind::MalformedInput,
        }),
    )
}

fn parse_address(s: &str) -> Result<Address, (StatusCode, Json<ApiError>)> {
    s.parse()
        .map_err(|e| bad_request(format!("Invalid address {}: {}", s, e)))
}

fn parse_hash(s: &str) -> Result<H256, (StatusCode, Json<ApiError>)> {
    s.parse()
        .map_err(|e| bad_request(format!("Invalid hash {}: {}", s, e)))
}

/// Decode packed bytes that must hold exactly one owner signature over `hash`
fn single_signature(hash: &H256, bytes: &[u8]) -> Result<OwnerSignature, (StatusCode, Json<ApiError>)> {
    let mut signatures =
        decode_signatures(hash, bytes).map_err(|e| service_error(ServiceError::Rejected(e)))?;
    if signatures.len() != 1 {
        return Err(bad_request(format!(
            "Expected one signature, got {}",
            signatures.len()
        )));
    }
    Ok(signatures.remove(0))
}

// ============================================================================
// Ledger Endpoints
// ============================================================================

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /api/v1/about - Relay settings
pub async fn about(State(state): State<ApiState>) -> Json<AboutResponse> {
    let config = state.service.config();
    Json(AboutResponse {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        chain_id: config.chain_id,
        auto_execute: config.auto_execute,
        block_number: state.service.ledger().read().await.block_number(),
    })
}

/// POST /api/v1/safes - Deploy a Safe
pub async fn deploy_safe(
    State(state): State<ApiState>,
    Json(req): Json<DeploySafeRequest>,
) -> ApiResult<DeployResponse> {
    let config = SafeConfig::new(req.owners, req.threshold, req.salt_nonce)
        .map_err(|e| service_error(ServiceError::Rejected(e)))?;

    let response = {
        let mut ledger = state.service.ledger().write().await;
        let receipt = ledger
            .deploy_safe(config, req.deployer)
            .map_err(|e| service_error(e.into()))?;
        let address = match &receipt.kind {
            ReceiptKind::Deployment { safe } => *safe,
            _ => receipt.to,
        };
        let safe = ledger.safe(&address).ok_or_else(|| {
            service_error(ServiceError::SafeNotFound(address))
        })?;
        DeployResponse {
            safe: SafeResponse::new(safe, ledger.balance_of(&address)),
            receipt,
        }
    };

    state.persist().await;
    state.ws_broadcaster.broadcast(WsEvent::SafeDeployed {
        address: response.safe.address,
        description: response.safe.description.clone(),
    });

    Ok(Json(response))
}

/// GET /api/v1/safes/{address}
pub async fn get_safe(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<SafeResponse> {
    let address = parse_address(&address)?;
    let ledger = state.service.ledger().read().await;
    let safe = ledger
        .safe(&address)
        .ok_or_else(|| service_error(ServiceError::SafeNotFound(address)))?;
    Ok(Json(SafeResponse::new(safe, ledger.balance_of(&address))))
}

/// GET /api/v1/safes/{address}/balance and /api/v1/accounts/{address}
pub async fn get_balance(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<BalanceResponse> {
    let address = parse_address(&address)?;
    let ledger = state.service.ledger().read().await;
    let balance = ledger.balance_of(&address);
    Ok(Json(BalanceResponse {
        address,
        balance,
        formatted: format_ether(balance),
        nonce: ledger.nonce_of(&address),
    }))
}

/// POST /api/v1/faucet - Mint test funds
pub async fn faucet(
    State(state): State<ApiState>,
    Json(req): Json<FaucetRequest>,
) -> ApiResult<Receipt> {
    let receipt = state
        .service
        .ledger()
        .write()
        .await
        .credit(req.address, req.amount)
        .map_err(|e| service_error(e.into()))?;

    state.persist().await;
    Ok(Json(receipt))
}

/// POST /api/v1/transfers - Apply a signed value transfer
pub async fn transfer(
    State(state): State<ApiState>,
    Json(req): Json<SignedTransfer>,
) -> ApiResult<Receipt> {
    let receipt = state
        .service
        .ledger()
        .write()
        .await
        .transfer(&req)
        .map_err(|e| service_error(e.into()))?;

    state.persist().await;
    Ok(Json(receipt))
}

// ============================================================================
// Transaction Endpoints
// ============================================================================

/// POST /api/v1/safes/{address}/multisig-transactions - Propose an envelope
pub async fn propose_transaction(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Json(req): Json<ProposeTransactionRequest>,
) -> ApiResult<TransactionResponse> {
    let safe = parse_address(&address)?;
    let signature = single_signature(&req.safe_tx_hash, &req.signature)?;

    let pending = state
        .service
        .propose_transaction(Proposal {
            safe,
            data: req.transaction,
            safe_tx_hash: req.safe_tx_hash,
            sender: req.sender,
            signature,
        })
        .await
        .map_err(service_error)?;

    state.persist().await;
    state.ws_broadcaster.broadcast(WsEvent::TransactionProposed {
        safe,
        safe_tx_hash: pending.safe_tx_hash,
        nonce: pending.data.nonce,
        confirmations: pending.confirmation_count(),
        required: pending.threshold,
    });

    Ok(Json(TransactionResponse::from(&pending)))
}

/// GET /api/v1/safes/{address}/multisig-transactions/pending
pub async fn list_pending_transactions(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<Vec<TransactionResponse>> {
    let safe = parse_address(&address)?;
    let pending = state
        .service
        .pending_transactions(&safe)
        .await
        .map_err(service_error)?;
    Ok(Json(pending.iter().map(TransactionResponse::from).collect()))
}

/// GET /api/v1/safes/{address}/multisig-transactions - Full history, newest nonce first
pub async fn list_transactions(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<Vec<TransactionResponse>> {
    let safe = parse_address(&address)?;
    state.service.safe_account(&safe).await.map_err(service_error)?;

    let mut all = state.service.transactions_for(&safe).await;
    all.sort_by(|a, b| {
        b.data
            .nonce
            .cmp(&a.data.nonce)
            .then(b.submitted_at.cmp(&a.submitted_at))
    });
    Ok(Json(all.iter().map(TransactionResponse::from).collect()))
}

/// GET /api/v1/multisig-transactions/{hash}
pub async fn get_transaction(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> ApiResult<TransactionResponse> {
    let hash = parse_hash(&hash)?;
    let pending = state.service.transaction(&hash).await.map_err(service_error)?;
    Ok(Json(TransactionResponse::from(&pending)))
}

/// POST /api/v1/multisig-transactions/{hash}/confirmations
pub async fn confirm_transaction(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
    Json(req): Json<SignatureRequest>,
) -> ApiResult<ConfirmResponse> {
    let hash = parse_hash(&hash)?;
    let signature = single_signature(&hash, &req.signature)?;
    let owner = signature.signer;

    let confirmation = state
        .dispatcher
        .confirm(&hash, signature)
        .await
        .map_err(service_error)?;

    state.persist().await;

    let tx = &confirmation.transaction;
    if confirmation.outcome == SignatureOutcome::Added {
        state.ws_broadcaster.broadcast(WsEvent::ConfirmationAdded {
            safe_tx_hash: hash,
            owner,
            confirmations: tx.confirmation_count(),
            required: tx.threshold,
        });
    }
    if let Some(receipt) = &confirmation.execution {
        state.ws_broadcaster.broadcast(WsEvent::TransactionExecuted {
            safe: tx.safe,
            safe_tx_hash: hash,
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
        });
    }

    Ok(Json(ConfirmResponse {
        transaction: TransactionResponse::from(tx),
        outcome: confirmation.outcome,
        execution: confirmation.execution,
        execution_error: confirmation.execution_error,
    }))
}

/// POST /api/v1/multisig-transactions/{hash}/execute
pub async fn execute_transaction(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
    Json(req): Json<ExecuteRequest>,
) -> ApiResult<Receipt> {
    let hash = parse_hash(&hash)?;
    let receipt = state
        .dispatcher
        .execute(&hash, req.executor)
        .await
        .map_err(service_error)?;

    state.persist().await;
    let safe = match &receipt.kind {
        ReceiptKind::SafeExecution { safe, .. } => *safe,
        _ => receipt.from,
    };
    state.ws_broadcaster.broadcast(WsEvent::TransactionExecuted {
        safe,
        safe_tx_hash: hash,
        tx_hash: receipt.tx_hash,
        block_number: receipt.block_number,
    });

    Ok(Json(receipt))
}

// ============================================================================
// Message Endpoints
// ============================================================================

/// POST /api/v1/safes/{address}/messages - Create a message with the first signature
pub async fn create_message(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Json(req): Json<CreateMessageRequest>,
) -> ApiResult<MessageResponse> {
    let safe = parse_address(&address)?;
    let hash = safe_text_message_hash(state.service.chain_id(), &safe, &req.message);
    let signature = single_signature(&hash, &req.signature)?;

    let message = state
        .service
        .add_message(&safe, req.message, signature)
        .await
        .map_err(service_error)?;

    state.persist().await;
    broadcast_if_confirmed(&state, &message);
    Ok(Json(MessageResponse::from(&message)))
}

/// GET /api/v1/safes/{address}/messages
pub async fn list_messages(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<Vec<MessageResponse>> {
    let safe = parse_address(&address)?;
    state.service.safe_account(&safe).await.map_err(service_error)?;
    let messages = state.service.messages_for(&safe).await;
    Ok(Json(messages.iter().map(MessageResponse::from).collect()))
}

/// GET /api/v1/messages/{hash}
pub async fn get_message(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> ApiResult<MessageResponse> {
    let hash = parse_hash(&hash)?;
    let message = state.service.message(&hash).await.map_err(service_error)?;
    Ok(Json(MessageResponse::from(&message)))
}

/// POST /api/v1/messages/{hash}/signatures
pub async fn add_message_signature(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
    Json(req): Json<SignatureRequest>,
) -> ApiResult<MessageResponse> {
    let hash = parse_hash(&hash)?;
    let signature = single_signature(&hash, &req.signature)?;

    let (message, outcome) = state
        .service
        .add_message_signature(&hash, signature)
        .await
        .map_err(service_error)?;

    state.persist().await;
    if outcome == SignatureOutcome::Added {
        broadcast_if_confirmed(&state, &message);
    }
    Ok(Json(MessageResponse::from(&message)))
}

fn broadcast_if_confirmed(state: &ApiState, message: &PendingMessage) {
    // Only the signature that crosses the threshold announces it
    if message.status() == MessageStatus::Confirmed
        && message.confirmations.len() == message.threshold as usize
    {
        state.ws_broadcaster.broadcast(WsEvent::MessageConfirmed {
            safe: message.safe,
            message_hash: message.message_hash,
        });
    }
}
