use clap::Parser;
use color_print::cformat;
use lamport_mutex::config::CliArgs;
use lamport_mutex::poisson::Poisson;
use lamport_mutex::{log, Node, NodeConfig, NodeHandle, Result};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

/// Enters and leaves the critical section `rounds` times (forever when 0).
async fn work(node: &NodeHandle, rounds: u64, rate: f64, work: Duration) -> Result<()> {
    let mut poisson = Poisson::from_entropy(rate);
    let mut round = 0;

    while rounds == 0 || round < rounds {
        round += 1;
        tokio::time::sleep(poisson.next_delay()).await;

        let timestamp = node.acquire().await?;
        info!(
            "{}",
            cformat!("<green, bold>Entered</green, bold> the critical section (round <bold>{round}</bold>, T=<bold>{timestamp}</bold>).")
        );
        tokio::time::sleep(work).await;

        let timestamp = node.release_access().await?;
        info!(
            "{}",
            cformat!("<yellow, bold>Left</yellow, bold> the critical section (T=<bold>{timestamp}</bold>).")
        );
    }
    Ok(())
}

async fn run(args: CliArgs) -> Result<()> {
    let config = NodeConfig::try_from(&args)?;
    let node = Node::from_config(config).start().await?;

    info!(
        "{}",
        cformat!(
            "Node <bold>{}</bold> listening on <bold>{}</bold>.",
            node.id(),
            node.local_addr().map(|a| a.to_string()).unwrap_or_default()
        )
    );

    let result = tokio::select! {
        result = work(&node, args.rounds, args.rate, Duration::from_millis(args.work_ms)) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    };

    // Don't leave peers waiting on a section nobody will release.
    if node.in_critical_section() {
        node.release_access().await?;
    }
    node.shutdown().await?;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    if let Err(e) = log::init(&args.log_level, args.log_file.as_deref()) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
