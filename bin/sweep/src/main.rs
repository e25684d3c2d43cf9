//! `txsweep` reads a range of blocks from a JSON-RPC node and writes every transaction that
//! transfers value to a JSON lines file.
//!
//! ```sh
//! txsweep --rpc-url https://eth.llamarpc.com --start 12000000 --end 12000100
//! ```

use clap::Parser;

mod cli;
mod sweep;

fn main() {
    // Before the runtime starts its worker threads.
    txsweep_cli::backtrace::enable();

    let cli = cli::Cli::parse();
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(anyhow::Error::from)
        .and_then(|runtime| runtime.block_on(cli.run()));

    if let Err(err) = result {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
