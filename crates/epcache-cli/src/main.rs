mod cli;

use crate::cli::CliCommand;

#[tokio::main]
async fn main() {
    // Logging is initialized after argument parsing: workers log to stderr,
    // everything else to the state dir.
    match CliCommand::run_from_args().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("epcache error: {:#}", err);
            std::process::exit(1);
        }
    }
}
