use std::process::ExitCode;

use clap::Parser;

use deliberate_practice::cli::{self, Cli};
use deliberate_practice::config::Config;
use deliberate_practice::logging;

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config);

    let cli = Cli::parse();

    match cli::run(cli, &config) {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("error: failed to render output: {err}");
                ExitCode::FAILURE
            }
        },
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
