//! # markview CLI
//!
//! ```bash
//! markview translate README.md
//! markview --lang Japanese --concurrency 4 translate docs/ --out-dir docs-ja/
//! markview cache stats
//! ```

mod cli;

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match cli::run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
