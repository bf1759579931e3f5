use std::{env, fs, io};

use comms::specs::server::ServerSpec;
use log::info;
use parameter_server::ServerBuilder;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;

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
                format!("usage: parameter_server <spec.json> (or set {SPEC_VAR})"),
            )
        })?;

    let spec: ServerSpec = serde_json::from_str(&fs::read_to_string(&path)?)?;
    let server = ServerBuilder::new().build(&spec)?;

    let listener = TcpListener::bind(spec.listen).await?;
    info!(shard = server.shard_id(); "loaded spec from {path}");

    let token = CancellationToken::new();
    let serve = server.serve(listener, token.clone());
    tokio::pin!(serve);

    tokio::select! {
        ret = &mut serve => return ret,
        _ = signal::ctrl_c() => {
            info!("received SIGINT, closing connections");
        }
    }

    token.cancel();
    serve.await
}
