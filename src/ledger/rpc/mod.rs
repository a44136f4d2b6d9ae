pub mod client;
mod types;

pub use client::RpcLedgerClient;
