//! CLI commands for the Safe relay
//!
//! `serve` runs the relay in-process; every other command talks to a
//! running relay through [`ServiceClient`].

use crate::api::{create_router, ApiState};
use crate::client::{ClientError, ServiceClient};
use crate::crypto::{Address, KeyPair};
use crate::ledger::{format_ether, parse_ether, Ledger};
use crate::safe::{predict_safe_address, MessageStatus, SafeConfig, SafeTransactionData};
use crate::service::{ErrorKind, ServiceConfig, TransactionService, TransactionStatus};
use crate::storage::{Storage, StorageConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Explorer-style link for an address on the relay
fn safe_link(client: &ServiceClient, safe: &Address) -> String {
    format!("{}/api/v1/safes/{}", client.base_url(), safe)
}

/// Print fresh key pairs
pub fn cmd_keys_generate(count: u32) -> CliResult<()> {
    println!("🔑 Generated {} key pair(s)", count);
    for i in 0..count {
        let key_pair = KeyPair::generate();
        println!("\n   Key {}", i + 1);
        println!("   ├─ Address:     {}", key_pair.address());
        println!("   └─ Private key: {}", key_pair.private_key_hex());
    }
    println!("\n⚠️  Keep private keys secret. Export them as OWNER_<n>_PRIVATE_KEY to use them.");
    Ok(())
}

/// Settings for `serve`
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub port: u16,
    pub data_dir: PathBuf,
    pub service: ServiceConfig,
    /// Start from this backup instead of the current state file
    pub from_backup: Option<usize>,
}

/// Build the relay from saved state, or a fresh ledger on first start
pub async fn load_relay(
    storage: &Storage,
    config: &ServiceConfig,
    from_backup: Option<usize>,
) -> CliResult<Arc<TransactionService>> {
    let saved = match from_backup {
        Some(index) => {
            let state = storage.restore_backup(index).map_err(|e| {
                format!("{} (available backups: {:?})", e, storage.list_backups())
            })?;
            println!("⏪ Restoring backup {}", index);
            Some(state)
        }
        None => storage.load_if_exists()?,
    };

    let (ledger, snapshot) = match saved {
        Some(state) => {
            println!("📂 Loading existing state from {:?}", storage.config().data_dir);
            if state.ledger.chain_id() != config.chain_id {
                return Err(format!(
                    "Saved ledger is for chain {}, not {}",
                    state.ledger.chain_id(),
                    config.chain_id
                )
                .into());
            }
            (state.ledger, Some(state.service))
        }
        None => {
            println!("🆕 Starting a fresh ledger on chain {}", config.chain_id);
            (Ledger::new(config.chain_id), None)
        }
    };

    let service = Arc::new(TransactionService::new(
        config.clone(),
        Arc::new(RwLock::new(ledger)),
    ));
    if let Some(snapshot) = snapshot {
        service.restore(snapshot).await;
    }
    Ok(service)
}

/// Run the relay and its ledger until Ctrl+C
pub async fn cmd_serve(options: ServeOptions) -> CliResult<()> {
    let storage = Arc::new(Storage::new(StorageConfig {
        data_dir: options.data_dir.clone(),
        ..Default::default()
    })?);
    let service = load_relay(&storage, &options.service, options.from_backup).await?;

    let state = ApiState::new(service, Some(storage));
    let shutdown_state = state.clone();
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", options.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("🚀 Safe relay listening on http://localhost:{}", options.port);
    println!("   ├─ Chain id:     {}", options.service.chain_id);
    println!("   ├─ Auto-execute: {}", options.service.auto_execute);
    println!("   └─ Data dir:     {:?}", options.data_dir);
    println!();
    println!("📖 Endpoints:");
    println!("   GET  /health");
    println!("   GET  /ws");
    println!("   POST /api/v1/safes");
    println!("   POST /api/v1/safes/{{address}}/multisig-transactions");
    println!("   GET  /api/v1/safes/{{address}}/multisig-transactions/pending");
    println!("   POST /api/v1/multisig-transactions/{{hash}}/confirmations");
    println!("   POST /api/v1/multisig-transactions/{{hash}}/execute");
    println!("   POST /api/v1/safes/{{address}}/messages");
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            println!("\n📴 Shutting down relay...");
        })
        .await?;

    shutdown_state.persist().await;
    println!("💾 State saved");
    Ok(())
}

/// Deploy a Safe owned by `owners`, reusing it when already deployed
///
/// With `fund`, the first owner sends that many ether to the Safe,
/// drawing on the faucet if its own balance falls short.
pub async fn cmd_deploy(
    client: &ServiceClient,
    owners: &[KeyPair],
    threshold: u32,
    salt_nonce: u64,
    fund: Option<&str>,
) -> CliResult<Address> {
    let deployer = owners.first().ok_or("At least one owner key is required")?;
    let config = SafeConfig::new(
        owners.iter().map(|k| k.address()).collect(),
        threshold,
        salt_nonce,
    )?;

    println!("🏗️  Deploying {} Safe", config.description());
    for (i, owner) in config.owners.iter().enumerate() {
        println!("   ├─ Owner {}: {}", i + 1, owner);
    }

    let safe = match client.deploy_safe(&config, deployer.address()).await {
        Ok(deployed) => {
            println!("   └─ Deployed at {}", deployed.safe.address);
            deployed.safe.address
        }
        Err(e) if e.kind() == ErrorKind::Conflict => {
            let address = predict_safe_address(&config);
            println!("   └─ Already deployed at {}, reusing it", address);
            address
        }
        Err(e) => return Err(e.into()),
    };
    println!("🔗 {}", safe_link(client, &safe));

    if let Some(amount) = fund {
        let value = parse_ether(amount)?;
        let balance = client.account(&deployer.address()).await?.balance;
        if balance < value {
            client.faucet(deployer.address(), value - balance).await?;
        }

        let receipt = client.send_value(deployer, safe, value).await?;
        println!("💸 Funded Safe with {} ETH", amount);
        println!("   └─ Deposit transaction: {}", receipt.tx_hash);
    }

    Ok(safe)
}

/// Deploy, fund, propose, confirm and execute a transfer out of a 2-of-3 Safe
pub async fn cmd_transfer(
    client: &ServiceClient,
    owners: &[KeyPair],
    to: Address,
    amount: &str,
    fund: &str,
) -> CliResult<()> {
    if owners.len() < 2 {
        return Err("The transfer flow needs at least two owner keys".into());
    }
    let chain_id = client.about().await?.chain_id;

    println!("STAGE 1: deploy and fund");
    let safe = cmd_deploy(client, owners, 2, 0, Some(fund)).await?;

    println!("\nSTAGE 2: propose");
    let value = parse_ether(amount)?;
    let nonce = client.safe(&safe).await?.nonce;
    let data = SafeTransactionData::call(to, value, Vec::new(), nonce);
    let proposed = client
        .propose_signed(&owners[0], chain_id, &safe, data)
        .await?;
    println!("📝 Proposed {} ETH to {}", amount, to);
    println!("   ├─ Safe tx hash: {}", proposed.safe_tx_hash);
    println!("   └─ Nonce: {}", proposed.transaction.nonce);

    println!("\nSTAGE 3: confirm");
    let pending = client.pending_transactions(&safe).await?;
    let first = pending.first().ok_or("No pending transactions")?;
    let hash = first.safe_tx_hash;
    let confirmed = client.confirm_signed(&owners[1], &hash).await?;
    println!(
        "✍️  Owner 2 confirmed ({}/{})",
        confirmed.transaction.confirmations.len(),
        confirmed.transaction.confirmations_required
    );

    println!("\nSTAGE 4: execute");
    let receipt = match confirmed.execution {
        Some(receipt) => {
            println!("⚡ Executed automatically by the relay");
            receipt
        }
        None => {
            let transaction = client.transaction(&hash).await?;
            if transaction.status == TransactionStatus::Executed {
                transaction.execution.ok_or("Executed without a receipt")?
            } else {
                client.execute_transaction(&hash, owners[0].address()).await?
            }
        }
    };
    println!("✅ Transaction executed");
    println!("   ├─ Tx hash: {}", receipt.tx_hash);
    println!("   └─ Block: {}", receipt.block_number);

    let after = client.safe(&safe).await?;
    println!(
        "\n💰 The final balance of the Safe: {} ETH",
        format_ether(after.balance)
    );
    Ok(())
}

/// Owner 1 creates the message, owner 2 adds a signature
pub async fn cmd_sign_message(
    client: &ServiceClient,
    owners: &[KeyPair],
    safe: Address,
    message: &str,
) -> CliResult<()> {
    if owners.len() < 2 {
        return Err("Signing a message needs at least two owner keys".into());
    }
    let chain_id = client.about().await?.chain_id;

    let created = match client
        .create_message_signed(&owners[0], chain_id, &safe, message)
        .await
    {
        Ok(created) => created,
        Err(ClientError::Api {
            kind: Some(ErrorKind::MalformedInput),
            message: reason,
            ..
        }) => return Err(format!("Owner 1 cannot sign for {}: {}", safe, reason).into()),
        Err(e) => return Err(e.into()),
    };
    let hash = created.message_hash;
    println!("📨 Message added to Safe {}", safe);
    println!("   ├─ Text: {:?}", message);
    println!("   └─ Safe message hash: {}", hash);

    let signature = owners[1].sign_hash(&hash)?;
    let signed = client.add_message_signature(&hash, signature.to_vec()).await?;

    let label = match signed.status {
        MessageStatus::Confirmed => "✅ Confirmed",
        MessageStatus::Pending => "⏳ Pending",
    };
    println!("\n{} message {}", label, hash);
    match signed.prepared_signature {
        Some(prepared) => {
            println!(
                "   ├─ Signatures: {}/{}",
                signed.confirmations.len(),
                signed.confirmations_required
            );
            println!("   └─ Prepared signature: {}", prepared);
        }
        None => println!(
            "   └─ Signatures: {}/{}",
            signed.confirmations.len(),
            signed.confirmations_required
        ),
    }
    Ok(())
}

/// Mint test funds
pub async fn cmd_faucet(client: &ServiceClient, address: Address, amount: &str) -> CliResult<()> {
    let value = parse_ether(amount)?;
    let receipt = client.faucet(address, value).await?;
    println!("🚰 Sent {} ETH to {}", amount, address);
    println!("   └─ Tx hash: {}", receipt.tx_hash);
    Ok(())
}

/// Show an account's balance
pub async fn cmd_balance(client: &ServiceClient, address: Address) -> CliResult<()> {
    let account = client.account(&address).await?;
    println!("💰 Balance for {}", address);
    println!("   ├─ Total: {} ETH", account.formatted);
    println!("   └─ Nonce: {}", account.nonce);
    Ok(())
}

/// List open envelopes of a Safe
pub async fn cmd_pending(client: &ServiceClient, safe: Address) -> CliResult<()> {
    let pending = client.pending_transactions(&safe).await?;

    if pending.is_empty() {
        println!("📭 No pending transactions for {}", safe);
        return Ok(());
    }

    println!("📋 Pending transactions for {} ({}):", safe, pending.len());
    for tx in &pending {
        println!("\n   {}", tx.safe_tx_hash);
        println!("   ├─ Nonce: {}", tx.transaction.nonce);
        println!(
            "   ├─ {} ETH to {}",
            format_ether(tx.transaction.value),
            tx.transaction.to
        );
        println!(
            "   ├─ Confirmations: {}/{}",
            tx.confirmations.len(),
            tx.confirmations_required
        );
        println!("   └─ Status: {:?}", tx.status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RetryPolicy;
    use crate::storage::PersistedState;
    use futures::future::join_all;
    use std::time::Duration;

    const CHAIN: u64 = 11155111;

    fn config(auto_execute: bool) -> ServiceConfig {
        ServiceConfig {
            chain_id: CHAIN,
            auto_execute,
        }
    }

    fn storage_in(dir: &tempfile::TempDir) -> Arc<Storage> {
        Arc::new(
            Storage::new(StorageConfig {
                data_dir: dir.path().to_path_buf(),
                ..Default::default()
            })
            .unwrap(),
        )
    }

    async fn start_persistent_relay(storage: Arc<Storage>) -> ServiceClient {
        let service = load_relay(&storage, &config(true), None).await.unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let app = create_router(ApiState::new(service, Some(storage)));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        ServiceClient::with_policy(url, RetryPolicy::none(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_are_all_saved() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);
        let client = start_persistent_relay(storage.clone()).await;

        let addresses: Vec<Address> = (1..=8u8).map(|i| Address([i; 20])).collect();
        let results = join_all(addresses.iter().map(|a| client.faucet(*a, 1_000))).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let saved = storage.load().unwrap();
        for address in &addresses {
            assert_eq!(saved.ledger.balance_of(address), 1_000);
        }
        assert_eq!(saved.ledger.block_number(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirmations_saved_and_restored() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);
        let client = start_persistent_relay(storage.clone()).await;

        let keys: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        let safe_config =
            SafeConfig::new(keys.iter().map(|k| k.address()).collect(), 2, 0).unwrap();
        let safe = client
            .deploy_safe(&safe_config, keys[0].address())
            .await
            .unwrap()
            .safe
            .address;
        client.faucet(safe, 10_000).await.unwrap();

        let data = SafeTransactionData::call(Address([0xd7; 20]), 4_000, Vec::new(), 0);
        let hash = client
            .propose_signed(&keys[0], CHAIN, &safe, data)
            .await
            .unwrap()
            .safe_tx_hash;

        let (a, b) = tokio::join!(
            client.confirm_signed(&keys[1], &hash),
            client.confirm_signed(&keys[2], &hash)
        );
        let mut executions = 0;
        for result in [a, b] {
            match result {
                Ok(confirmed) => executions += confirmed.execution.iter().count(),
                Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict),
            }
        }
        assert_eq!(executions, 1);

        let saved = storage.load().unwrap();
        assert_eq!(saved.ledger.executions(), 1);
        assert_eq!(saved.ledger.safe(&safe).unwrap().nonce, 1);
        let envelope = saved
            .service
            .transactions
            .iter()
            .find(|tx| tx.safe_tx_hash == hash)
            .unwrap();
        assert_eq!(envelope.status, TransactionStatus::Executed);

        // A restart picks up where the relay stopped
        let restarted = load_relay(&storage, &config(false), None).await.unwrap();
        let restored = restarted.transaction(&hash).await.unwrap();
        assert_eq!(restored.status, TransactionStatus::Executed);
        assert!(restored.execution.is_some());
        assert_eq!(
            restarted.ledger().read().await.balance_of(&Address([0xd7; 20])),
            4_000
        );
    }

    #[tokio::test]
    async fn test_load_relay_refuses_other_chain() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);
        storage
            .save(&PersistedState::new(Ledger::new(1), Default::default()))
            .unwrap();

        let err = load_relay(&storage, &config(false), None).await.err().unwrap();
        assert!(err.to_string().contains("chain 1"));
    }

    #[tokio::test]
    async fn test_load_relay_from_backup() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);

        let mut ledger = Ledger::new(CHAIN);
        ledger.credit(Address([1; 20]), 5).unwrap();
        storage
            .save(&PersistedState::new(ledger.clone(), Default::default()))
            .unwrap();
        ledger.credit(Address([1; 20]), 5).unwrap();
        storage
            .save(&PersistedState::new(ledger, Default::default()))
            .unwrap();

        let current = load_relay(&storage, &config(false), None).await.unwrap();
        assert_eq!(current.ledger().read().await.balance_of(&Address([1; 20])), 10);

        let previous = load_relay(&storage, &config(false), Some(0)).await.unwrap();
        assert_eq!(previous.ledger().read().await.balance_of(&Address([1; 20])), 5);

        let missing = load_relay(&storage, &config(false), Some(3)).await.err().unwrap();
        assert!(missing.to_string().contains("available backups: [0]"));
    }

    #[tokio::test]
    async fn test_fresh_start_without_state() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);
        let service = load_relay(&storage, &config(false), None).await.unwrap();
        assert_eq!(service.ledger().read().await.block_number(), 0);
        assert!(!storage.exists());
    }
}
