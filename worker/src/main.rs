use std::{env, fs, io};

use comms::specs::worker::WorkerSpec;
use log::{error, info};
use tokio::{signal, task::JoinSet};
use tokio_util::sync::CancellationToken;

use worker::WorkerBuilder;

const SPEC_VAR: &str = "SPEC";

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let path = env::args()
        .nth(1)
        .or_else(|| env::var(SPEC_VAR).ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("usage: worker <spec.json> (or set {SPEC_VAR})"),
            )
        })?;

    let spec: WorkerSpec = serde_json::from_str(&fs::read_to_string(&path)?)?;
    let builder = WorkerBuilder::new(spec)?;
    info!("loaded spec from {path}");

    if builder.spec().local.is_some() {
        let report = tokio::task::spawn_blocking(move || builder.run_local()).await??;
        info!(
            steps = report.steps, converged = report.converged;
            "local training done, loss {:?}", report.loss
        );
        return Ok(());
    }

    let token = CancellationToken::new();
    let mut workers = JoinSet::new();

    for local in 0..builder.spec().workers.get() {
        let worker = builder.build(local, token.clone())?;
        workers.spawn(worker.run());
    }

    let mut failed = false;
    while !workers.is_empty() {
        tokio::select! {
            Some(ret) = workers.join_next() => match ret {
                Ok(Ok(report)) => info!(steps = report.steps; "worker done"),
                Ok(Err(e)) => {
                    error!("worker failed: {e}");
                    failed = true;
                }
                Err(e) => {
                    error!("worker task failed: {e}");
                    failed = true;
                }
            },
            _ = signal::ctrl_c(), if !token.is_cancelled() => {
                info!("received SIGINT, stopping workers");
                token.cancel();
            }
            else => break,
        }
    }

    if failed {
        return Err(io::Error::other("at least one worker failed"));
    }

    Ok(())
}
