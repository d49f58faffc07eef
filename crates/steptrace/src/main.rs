// Steptrace - EVM Execution Trace Reconstruction
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Steptrace - EVM execution trace reconstruction
//!
//! Fetches the struct-log trace of a transaction from a node and prints the
//! reconstructed call tree as JSON on stdout.

use std::time::Duration;

use alloy_primitives::TxHash;
use clap::Parser;
use eyre::{Result, WrapErr};
use steptrace_common::init_logging;
use steptrace_rpc::{TraceClientConfig, TraceRequestClient, DEFAULT_RPC_URL};
use tracing::info;

/// Steptrace command line
#[derive(Parser, Debug)]
#[command(name = "steptrace")]
#[command(about = "Reconstruct the call tree of an EVM transaction from its struct-log trace")]
#[command(version)]
struct Args {
    /// Hash of the transaction to trace
    tx_hash: String,

    /// Ethereum RPC endpoint with the debug namespace enabled
    #[arg(long, env = "ETH_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "120")]
    timeout: u64,

    /// Ask the node not to record memory (inputs, outputs and log data read as zeros)
    #[arg(long)]
    no_memory: bool,

    /// Also write logs to a daily rotated file
    #[arg(long)]
    log_file: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Verbosity level (repeat for more: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn client_config(&self) -> TraceClientConfig {
        TraceClientConfig::new(&self.rpc_url)
            .with_timeout(Duration::from_secs(self.timeout))
            .with_memory(!self.no_memory)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    // Set RUST_LOG based on verbosity
    if std::env::var("RUST_LOG").is_err() {
        let level = match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }
    init_logging("steptrace", args.log_file)?;

    let tx_hash: TxHash = args
        .tx_hash
        .parse()
        .wrap_err_with(|| format!("invalid transaction hash {}", args.tx_hash))?;

    let client = TraceRequestClient::new(args.client_config())?;
    info!(%tx_hash, rpc_url = %args.rpc_url, "tracing transaction");

    let trace = client.trace_transaction(tx_hash).await?;
    info!(items = trace.items.len(), failed = trace.failed, "trace reconstructed");

    let output = if args.pretty {
        serde_json::to_string_pretty(&trace)?
    } else {
        serde_json::to_string(&trace)?
    };
    println!("{output}");
    Ok(())
}
