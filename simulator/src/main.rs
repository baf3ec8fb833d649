mod workload;

use std::fs;
use std::io;
use std::io::Write;
use std::process::ExitCode;

use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use crate::workload::Workload;
use crate::workload::WorkloadError;

const USAGE: &str = "Usage: simulator [run <workload.json>|sysinfo|demo]";

fn main() -> ExitCode {
    // Logs go to stderr so stdout stays a single JSON document.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let command = args.next();
    let result = match command.as_deref() {
        Some("run") => match args.next() {
            Some(path) => run(&path),
            None => {
                eprintln!("Error: run needs a workload file.");
                eprintln!("{USAGE}");
                return ExitCode::FAILURE;
            }
        },
        Some("sysinfo") => print_json(&backing::system_info()),
        Some("demo") => demo(),
        Some(cmd) => {
            eprintln!("Error: Unknown command '{cmd}'");
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
        None => {
            eprintln!("Error: No command provided.");
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("simulator: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(path: &str) -> Result<(), WorkloadError> {
    let text = fs::read_to_string(path)?;
    let workload = Workload::from_json(&text)?;
    let records = workload.replay()?;
    print_json(&records)
}

fn demo() -> Result<(), WorkloadError> {
    let mut runs = Vec::new();
    for (strategy, workload) in workload::demo_workloads() {
        log::info!("simulator: demo with {strategy}");
        let records = workload.replay()?;
        runs.push(json!({ "strategy": strategy, "records": records }));
    }
    print_json(&runs)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), WorkloadError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
