//! REST API module
//!
//! HTTP front end of the relay, in the shape of the Safe transaction service.
//!
//! # Endpoints
//!
//! ## Ledger
//! - `GET /api/v1/about` - Chain id and relay settings
//! - `POST /api/v1/safes` - Deploy a Safe
//! - `GET /api/v1/safes/{address}` - Safe owners, threshold, nonce and balance
//! - `GET /api/v1/safes/{address}/balance` - Safe balance
//! - `GET /api/v1/accounts/{address}` - Balance and nonce of any account
//! - `POST /api/v1/faucet` - Mint test funds
//! - `POST /api/v1/transfers` - Signed value transfer
//!
//! ## Envelopes
//! - `POST /api/v1/safes/{address}/multisig-transactions` - Propose
//! - `GET /api/v1/safes/{address}/multisig-transactions` - History
//! - `GET /api/v1/safes/{address}/multisig-transactions/pending` - Open envelopes
//! - `GET /api/v1/multisig-transactions/{hash}` - One envelope
//! - `POST /api/v1/multisig-transactions/{hash}/confirmations` - Confirm
//! - `POST /api/v1/multisig-transactions/{hash}/execute` - Execute
//!
//! ## Messages
//! - `POST /api/v1/safes/{address}/messages` - Create with first signature
//! - `GET /api/v1/safes/{address}/messages` - List
//! - `GET /api/v1/messages/{hash}` - One message
//! - `POST /api/v1/messages/{hash}/signatures` - Add a signature
//!
//! ## WebSocket
//! - `GET /ws` - Relay events

pub mod handlers;
pub mod routes;
pub mod websocket;

pub use handlers::{ApiError, ApiState};
pub use routes::create_router;
pub use websocket::{WsBroadcaster, WsEvent};
