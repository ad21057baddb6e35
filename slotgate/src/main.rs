use std::process;
use std::time::Duration;

use slotgate::config::LimiterConfig;
use slotgate::runner::{RunError, Runner};
use slotgate::signal::wait_for_shutdown_signal;
use slotgate::telemetry::init_tracing;
use tracing::{info, warn};

struct Args {
    jobs: usize,
    work: Duration,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let args = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!();
            eprintln!("Usage: slotgate [--jobs <n>] [--work-ms <ms>]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --jobs <n>       Number of jobs to run [default: 8]");
            eprintln!("  --work-ms <ms>   Simulated duration of each job [default: 250]");
            eprintln!();
            eprintln!("Environment:");
            eprintln!("  SLOTGATE_CAPACITY        Concurrent slots [default: 1]");
            eprintln!("  SLOTGATE_STRATEGY        buffered | queued [default: queued]");
            eprintln!("  SLOTGATE_TRACE_BORROWS   Log every borrow [default: false]");
            eprintln!("  SLOTGATE_LOG             trace | debug | info | warn | error");
            process::exit(2);
        }
    };

    if let Err(e) = run(args).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args {
        jobs: 8,
        work: Duration::from_millis(250),
    };

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--jobs" => {
                i += 1;
                let raw = args.get(i).ok_or("--jobs requires a value")?;
                parsed.jobs = raw
                    .parse()
                    .map_err(|_| format!("invalid --jobs value: {raw}"))?;
            }
            "--work-ms" => {
                i += 1;
                let raw = args.get(i).ok_or("--work-ms requires a value")?;
                let ms: u64 = raw
                    .parse()
                    .map_err(|_| format!("invalid --work-ms value: {raw}"))?;
                parsed.work = Duration::from_millis(ms);
            }
            "--help" | "-h" => return Err("".to_string()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(parsed)
}

async fn run(args: Args) -> anyhow::Result<()> {
    init_tracing();
    info!("slotgate {}", env!("CARGO_PKG_VERSION"));

    let config = LimiterConfig::from_env();
    let limiter = config.build()?;
    info!(
        capacity = config.capacity,
        strategy = %config.strategy,
        jobs = args.jobs,
        "Limiter ready"
    );

    let runner = Runner::new(limiter);
    tokio::spawn(wait_for_shutdown_signal(runner.shutdown_token()));

    let handles: Vec<_> = (0..args.jobs)
        .map(|n| {
            let work = args.work;
            runner.spawn(format!("job-{n}"), async move {
                tokio::time::sleep(work).await;
                n
            })
        })
        .collect();

    let mut completed = 0usize;
    let mut skipped = 0usize;
    for result in futures::future::join_all(handles).await {
        match result? {
            Ok(n) => {
                completed += 1;
                info!(job = n, "Job done");
            }
            Err(RunError::Shutdown | RunError::Cancelled) => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(completed, skipped, "Shut down before all jobs ran");
    } else {
        info!(completed, "All jobs done");
    }
    runner.shutdown();

    Ok(())
}
