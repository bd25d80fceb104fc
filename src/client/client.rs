//! HTTP client for the relay API

use crate::api::handlers::{
    AboutResponse, ApiError, BalanceResponse, ConfirmResponse, CreateMessageRequest,
    DeployResponse, DeploySafeRequest, ExecuteRequest, FaucetRequest, MessageResponse,
    ProposeTransactionRequest, SafeResponse, SignatureRequest, TransactionResponse,
};
use crate::client::error::ClientError;
use crate::client::retry::RetryPolicy;
use crate::crypto::{Address, KeyPair, H256};
use crate::ledger::{Receipt, SignedTransfer};
use crate::safe::{safe_text_message_hash, SafeConfig, SafeTransactionData};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Relay API client with retries on transient failures
#[derive(Clone)]
pub struct ServiceClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ServiceClient {
    /// Client with the default retry policy and a 30 second timeout
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_policy(base_url, RetryPolicy::default(), Duration::from_secs(30))
    }

    pub fn with_policy(
        base_url: impl Into<String>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request, retrying transport failures and 5xx answers
    async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 1;

        loop {
            let mut request = self.http.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }

            let error = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => api_error(response).await,
                Err(e) => ClientError::Http(e),
            };

            if !error.is_transient() {
                return Err(error);
            }
            if attempt >= self.retry.max_attempts {
                return Err(ClientError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.retry.delay(attempt);
            log::warn!(
                "{} {} failed (attempt {}/{}), retrying in {}ms: {}",
                method,
                path,
                attempt,
                self.retry.max_attempts,
                delay.as_millis(),
                error
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.execute::<()>(Method::GET, path, None).await?;
        Ok(response.json().await?)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self.execute(Method::POST, path, Some(body)).await?;
        Ok(response.json().await?)
    }

    pub async fn health(&self) -> Result<String, ClientError> {
        let response = self.execute::<()>(Method::GET, "/health", None).await?;
        Ok(response.text().await?)
    }

    pub async fn about(&self) -> Result<AboutResponse, ClientError> {
        self.get("/api/v1/about").await
    }

    // Ledger

    pub async fn deploy_safe(
        &self,
        config: &SafeConfig,
        deployer: Address,
    ) -> Result<DeployResponse, ClientError> {
        let request = DeploySafeRequest {
            owners: config.owners.clone(),
            threshold: config.threshold,
            salt_nonce: config.salt_nonce,
            deployer,
        };
        self.post("/api/v1/safes", &request).await
    }

    pub async fn safe(&self, address: &Address) -> Result<SafeResponse, ClientError> {
        self.get(&format!("/api/v1/safes/{}", address)).await
    }

    /// Balance and transfer nonce of any account
    pub async fn account(&self, address: &Address) -> Result<BalanceResponse, ClientError> {
        self.get(&format!("/api/v1/accounts/{}", address)).await
    }

    pub async fn faucet(&self, address: Address, amount: u128) -> Result<Receipt, ClientError> {
        self.post("/api/v1/faucet", &FaucetRequest { address, amount })
            .await
    }

    pub async fn transfer(&self, transfer: &SignedTransfer) -> Result<Receipt, ClientError> {
        self.post("/api/v1/transfers", transfer).await
    }

    /// Sign and send a value transfer from `key_pair`
    pub async fn send_value(
        &self,
        key_pair: &KeyPair,
        to: Address,
        value: u128,
    ) -> Result<Receipt, ClientError> {
        let chain_id = self.about().await?.chain_id;
        let nonce = self.account(&key_pair.address()).await?.nonce;
        let transfer = SignedTransfer::sign(key_pair, chain_id, to, value, nonce)
            .map_err(|e| ClientError::Signing(e.to_string()))?;
        self.transfer(&transfer).await
    }

    // Envelopes

    pub async fn propose_transaction(
        &self,
        safe: &Address,
        request: &ProposeTransactionRequest,
    ) -> Result<TransactionResponse, ClientError> {
        self.post(
            &format!("/api/v1/safes/{}/multisig-transactions", safe),
            request,
        )
        .await
    }

    /// Hash, sign and propose an envelope as `key_pair`
    pub async fn propose_signed(
        &self,
        key_pair: &KeyPair,
        chain_id: u64,
        safe: &Address,
        data: SafeTransactionData,
    ) -> Result<TransactionResponse, ClientError> {
        let safe_tx_hash = data.hash(chain_id, safe);
        let signature = key_pair
            .sign_hash(&safe_tx_hash)
            .map_err(|e| ClientError::Signing(e.to_string()))?;

        let request = ProposeTransactionRequest {
            transaction: data,
            safe_tx_hash,
            sender: key_pair.address(),
            signature: signature.to_vec(),
        };
        self.propose_transaction(safe, &request).await
    }

    pub async fn pending_transactions(
        &self,
        safe: &Address,
    ) -> Result<Vec<TransactionResponse>, ClientError> {
        self.get(&format!(
            "/api/v1/safes/{}/multisig-transactions/pending",
            safe
        ))
        .await
    }

    pub async fn transactions(&self, safe: &Address) -> Result<Vec<TransactionResponse>, ClientError> {
        self.get(&format!("/api/v1/safes/{}/multisig-transactions", safe))
            .await
    }

    pub async fn transaction(&self, safe_tx_hash: &H256) -> Result<TransactionResponse, ClientError> {
        self.get(&format!("/api/v1/multisig-transactions/{}", safe_tx_hash))
            .await
    }

    /// Submit packed signature bytes as a confirmation
    pub async fn confirm_transaction(
        &self,
        safe_tx_hash: &H256,
        signature: Vec<u8>,
    ) -> Result<ConfirmResponse, ClientError> {
        self.post(
            &format!("/api/v1/multisig-transactions/{}/confirmations", safe_tx_hash),
            &SignatureRequest { signature },
        )
        .await
    }

    pub async fn confirm_signed(
        &self,
        key_pair: &KeyPair,
        safe_tx_hash: &H256,
    ) -> Result<ConfirmResponse, ClientError> {
        let signature = key_pair
            .sign_hash(safe_tx_hash)
            .map_err(|e| ClientError::Signing(e.to_string()))?;
        self.confirm_transaction(safe_tx_hash, signature.to_vec())
            .await
    }

    pub async fn execute_transaction(
        &self,
        safe_tx_hash: &H256,
        executor: Address,
    ) -> Result<Receipt, ClientError> {
        self.post(
            &format!("/api/v1/multisig-transactions/{}/execute", safe_tx_hash),
            &ExecuteRequest { executor },
        )
        .await
    }

    // Messages

    pub async fn create_message(
        &self,
        safe: &Address,
        message: String,
        signature: Vec<u8>,
    ) -> Result<MessageResponse, ClientError> {
        self.post(
            &format!("/api/v1/safes/{}/messages", safe),
            &CreateMessageRequest { message, signature },
        )
        .await
    }

    /// Sign `message` for `safe` as `key_pair` and create it on the relay
    pub async fn create_message_signed(
        &self,
        key_pair: &KeyPair,
        chain_id: u64,
        safe: &Address,
        message: &str,
    ) -> Result<MessageResponse, ClientError> {
        let hash = safe_text_message_hash(chain_id, safe, message);
        let signature = key_pair
            .sign_hash(&hash)
            .map_err(|e| ClientError::Signing(e.to_string()))?;
        self.create_message(safe, message.to_string(), signature.to_vec())
            .await
    }

    pub async fn messages(&self, safe: &Address) -> Result<Vec<MessageResponse>, ClientError> {
        self.get(&format!("/api/v1/safes/{}/messages", safe)).await
    }

    pub async fn message(&self, message_hash: &H256) -> Result<MessageResponse, ClientError> {
        self.get(&format!("/api/v1/messages/{}", message_hash)).await
    }

    pub async fn add_message_signature(
        &self,
        message_hash: &H256,
        signature: Vec<u8>,
    ) -> Result<MessageResponse, ClientError> {
        self.post(
            &format!("/api/v1/messages/{}/signatures", message_hash),
            &SignatureRequest { signature },
        )
        .await
    }
}

async fn api_error(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<ApiError>(&body) {
        Ok(e) => ClientError::Api {
            status,
            kind: Some(e.kind),
            message: e.error,
        },
        Err(_) => ClientError::Api {
            status,
            kind: None,
            message: body,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{create_router, ApiState};
    use crate::ledger::{Ledger, ReceiptKind};
    use crate::safe::{build_contract_signature, encode_signatures, MessageStatus, OwnerSignature};
    use crate::service::{
        ErrorKind, ServiceConfig, SignatureOutcome, TransactionService, TransactionStatus,
    };
    use axum::{http::StatusCode, routing::get, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    const CHAIN: u64 = 11155111;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn start_relay(auto_execute: bool) -> ServiceClient {
        let service = TransactionService::new(
            ServiceConfig {
                chain_id: CHAIN,
                auto_execute,
            },
            Arc::new(RwLock::new(Ledger::new(CHAIN))),
        );
        let url = serve(create_router(ApiState::new(Arc::new(service), None))).await;
        ServiceClient::with_policy(url, RetryPolicy::none(), Duration::from_secs(5)).unwrap()
    }

    fn fast_retries(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            multiplier: 2.0,
        }
    }

    async fn deploy_two_of_three(client: &ServiceClient) -> (Address, Vec<KeyPair>) {
        let keys: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        let config = SafeConfig::new(keys.iter().map(|k| k.address()).collect(), 2, 0).unwrap();
        let deployed = client.deploy_safe(&config, keys[0].address()).await.unwrap();
        (deployed.safe.address, keys)
    }

    #[tokio::test]
    async fn test_transfer_flow() {
        let client = start_relay(false).await;
        assert_eq!(client.health().await.unwrap(), "OK");
        assert_eq!(client.about().await.unwrap().chain_id, CHAIN);

        let (safe, keys) = deploy_two_of_three(&client).await;
        client.faucet(safe, 1_000_000).await.unwrap();

        let recipient = Address([0xd7; 20]);
        let data = SafeTransactionData::call(recipient, 5_000, vec![], 0);
        let proposed = client
            .propose_signed(&keys[0], CHAIN, &safe, data)
            .await
            .unwrap();
        assert_eq!(proposed.confirmations.len(), 1);

        let pending = client.pending_transactions(&safe).await.unwrap();
        assert_eq!(pending.len(), 1);
        let hash = pending[0].safe_tx_hash;

        let early = client.execute_transaction(&hash, keys[0].address()).await;
        match early {
            Err(e) => assert_eq!(e.kind(), ErrorKind::ThresholdUnmet),
            Ok(_) => panic!("executed below threshold"),
        }

        let confirmed = client.confirm_signed(&keys[1], &hash).await.unwrap();
        assert_eq!(confirmed.outcome, SignatureOutcome::Added);
        assert_eq!(confirmed.transaction.status, TransactionStatus::Ready);

        let receipt = client
            .execute_transaction(&hash, keys[1].address())
            .await
            .unwrap();
        assert!(matches!(receipt.kind, ReceiptKind::SafeExecution { .. }));

        assert_eq!(client.account(&recipient).await.unwrap().balance, 5_000);
        let info = client.safe(&safe).await.unwrap();
        assert_eq!(info.nonce, 1);
        assert_eq!(info.balance, 995_000);
        assert!(client.pending_transactions(&safe).await.unwrap().is_empty());

        let replay = client.execute_transaction(&hash, keys[1].address()).await;
        match replay {
            Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict),
            Ok(_) => panic!("executed twice"),
        }
    }

    #[tokio::test]
    async fn test_auto_execute_on_threshold() {
        let client = start_relay(true).await;
        let (safe, keys) = deploy_two_of_three(&client).await;
        client.faucet(safe, 100).await.unwrap();

        let data = SafeTransactionData::call(Address([0xd7; 20]), 40, vec![], 0);
        let proposed = client
            .propose_signed(&keys[2], CHAIN, &safe, data)
            .await
            .unwrap();

        let confirmed = client
            .confirm_signed(&keys[0], &proposed.safe_tx_hash)
            .await
            .unwrap();
        assert!(confirmed.execution.is_some());
        assert_eq!(confirmed.transaction.status, TransactionStatus::Executed);
        assert_eq!(client.safe(&safe).await.unwrap().balance, 60);
    }

    #[tokio::test]
    async fn test_malformed_and_missing() {
        let client = start_relay(false).await;
        let (safe, keys) = deploy_two_of_three(&client).await;

        let missing = client.transaction(&H256([9; 32])).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        // Signature over the wrong hash recovers some other address
        let data = SafeTransactionData::call(Address([0xd7; 20]), 1, vec![], 0);
        let safe_tx_hash = data.hash(CHAIN, &safe);
        let wrong = keys[0].sign_hash(&H256([1; 32])).unwrap();
        let request = ProposeTransactionRequest {
            transaction: data,
            safe_tx_hash,
            sender: keys[0].address(),
            signature: wrong.to_vec(),
        };
        let err = client.propose_transaction(&safe, &request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
        assert!(client.pending_transactions(&safe).await.unwrap().is_empty());

        let bad_config = SafeConfig {
            owners: vec![keys[0].address()],
            threshold: 2,
            salt_nonce: 0,
        };
        let err = client
            .deploy_safe(&bad_config, keys[0].address())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[tokio::test]
    async fn test_message_with_nested_safe_owner() {
        let client = start_relay(false).await;

        // Inner 2-of-3 Safe that co-owns the outer Safe
        let (inner, inner_keys) = deploy_two_of_three(&client).await;
        let outer_key = KeyPair::generate();
        let config = SafeConfig::new(vec![outer_key.address(), inner], 2, 0).unwrap();
        let outer = client
            .deploy_safe(&config, outer_key.address())
            .await
            .unwrap()
            .safe
            .address;

        let text = "I'm the owner of this Safe account";
        let created = client
            .create_message_signed(&outer_key, CHAIN, &outer, text)
            .await
            .unwrap();
        assert_eq!(created.status, MessageStatus::Pending);

        let hash = created.message_hash;
        let inner_sigs: Vec<OwnerSignature> = inner_keys[..2]
            .iter()
            .map(|k| OwnerSignature::sign_nested(k, CHAIN, &inner, &hash).unwrap())
            .collect();
        let contract_sig = build_contract_signature(inner, &inner_sigs);

        let confirmed = client
            .add_message_signature(&hash, encode_signatures(&[contract_sig]))
            .await
            .unwrap();
        assert_eq!(confirmed.status, MessageStatus::Confirmed);
        assert!(confirmed.prepared_signature.is_some());
        assert_eq!(client.messages(&outer).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_when_unreachable() {
        // Bind then drop to find a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ServiceClient::with_policy(
            format!("http://{}", addr),
            fast_retries(3),
            Duration::from_secs(1),
        )
        .unwrap();

        match client.health().await {
            Err(ClientError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ClientError::Http(_)));
            }
            other => panic!("expected retries to be exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/health",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        (StatusCode::SERVICE_UNAVAILABLE, "busy")
                    } else {
                        (StatusCode::OK, "OK")
                    }
                }
            }),
        );
        let url = serve(router).await;

        let client = ServiceClient::with_policy(url, fast_retries(5), Duration::from_secs(1)).unwrap();
        assert_eq!(client.health().await.unwrap(), "OK");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/health",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::BAD_REQUEST, "nope")
                }
            }),
        );
        let url = serve(router).await;

        let client = ServiceClient::with_policy(url, fast_retries(5), Duration::from_secs(1)).unwrap();
        match client.health().await {
            Err(ClientError::Api { status, kind, .. }) => {
                assert_eq!(status, 400);
                assert!(kind.is_none());
            }
            other => panic!("expected api error, got {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
