pub mod api;
pub mod mock_client;
pub mod rpc;
pub mod types;

pub use api::{LedgerClient, LedgerError};
pub use mock_client::MockLedgerClient;
pub use rpc::RpcLedgerClient;
pub use types::{Block, Output, ScriptPubKey, Transaction};
