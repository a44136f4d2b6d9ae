use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use btc_payment_watcher::ledger::RpcLedgerClient;
use btc_payment_watcher::persistence::DEFAULT_STATE_PATH;
use btc_payment_watcher::{
    ConfirmedScanner, JsonFileHeightStore, RpcConfig, ScannerConfig, ScannerEvent,
};

/// Prints a payment as a JSON line or logs an error. Fatal errors are returned.
fn handle_event(event: ScannerEvent, out: &mut impl Write) -> Result<()> {
    match event {
        ScannerEvent::Output(payment) => {
            writeln!(out, "{}", serde_json::to_string(&payment)?)?;
        }
        ScannerEvent::Error(err) if err.is_fatal() => {
            return Err(anyhow::Error::new(err).context("scanner failed to start"));
        }
        ScannerEvent::Error(err) => log::error!("[MAIN] {}", err),
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8332")]
    rpc_url: String,

    #[arg(long)]
    rpc_user: Option<String>,

    #[arg(long)]
    rpc_password: Option<String>,

    #[arg(long, default_value_t = 30)]
    rpc_timeout_secs: u64,

    /// Confirmations required before a block is scanned
    #[arg(long, default_value_t = 1)]
    min_conf: u32,

    #[arg(long, default_value_t = 10)]
    interval_secs: u64,

    /// Transactions fetched in parallel per block
    #[arg(long, default_value_t = 3)]
    concurrency: usize,

    #[arg(long, default_value = DEFAULT_STATE_PATH)]
    state_file: PathBuf,

    /// First height to scan when no state file exists
    #[arg(long)]
    start_height: Option<u64>,
}

impl Args {
    fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            min_conf: self.min_conf,
            interval_ms: self.interval_secs.saturating_mul(1000),
            concurrency: self.concurrency,
            start_height: self.start_height,
        }
    }

    fn rpc_config(&self) -> RpcConfig {
        RpcConfig {
            url: self.rpc_url.clone(),
            user: self.rpc_user.clone(),
            password: self.rpc_password.clone(),
            timeout_secs: self.rpc_timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = args.scanner_config();
    config.validate()?;

    log::info!("[MAIN] Connecting to node: {}", args.rpc_url);
    let ledger = RpcLedgerClient::new(args.rpc_config()).context("failed to build RPC client")?;

    log::info!("[MAIN] State file: {}", args.state_file.display());
    let store = JsonFileHeightStore::new(args.state_file.clone());

    let (handle, mut events) = ConfirmedScanner::spawn(config, ledger, store);

    let status = handle.subscribe();
    let mut stdout = std::io::stdout();
    let mut stopping = false;
    let mut failure = None;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if let Err(err) = handle_event(event, &mut stdout) {
                        failure = Some(err);
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !stopping => {
                log::info!("[MAIN] Ctrl-C received, stopping scanner");
                handle.stop();
                stopping = true;
            }
        }
    }

    if failure.is_some() {
        handle.stop();
    }
    handle.join().await.context("scanner task failed")?;
    if let Some(err) = failure {
        return Err(err);
    }
    log::info!("[MAIN] Scanner stopped at height {:?}", status.borrow().scanned_height);

    Ok(())
}
