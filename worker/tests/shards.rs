use std::{collections::BTreeSet, io, net::SocketAddr, time::Duration};

use comms::sparse::{SparseDataset, SparseGradient, SparseSample};
use parameter_server::{
    ShardServer,
    optimization::GradientDescent,
    storage::{StoreHandle, WeightStore},
};
use tokio::{net::TcpListener, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use worker::{
    WorkerErr,
    net::{Backoff, ShardedClient},
};

struct Shard {
    addr: SocketAddr,
    store: StoreHandle<GradientDescent>,
    token: CancellationToken,
    task: JoinHandle<io::Result<()>>,
}

async fn spawn_shard(shard_id: usize, weights: Vec<f32>) -> io::Result<Shard> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let store = StoreHandle::new(WeightStore::new(weights, GradientDescent::new(1.)));
    let server = ShardServer::new(shard_id, store.clone());
    let token = CancellationToken::new();

    let task = {
        let token = token.clone();
        tokio::spawn(async move { server.serve(listener, token).await })
    };

    Ok(Shard {
        addr,
        store,
        token,
        task,
    })
}

/// Two shards over an 8 feature model, shard `s` holds `10 * s + local` at every slot.
async fn spawn_shards() -> io::Result<Vec<Shard>> {
    let mut shards = Vec::new();
    for s in 0..2 {
        let weights = (0..4).map(|l| (10 * s + l) as f32).collect();
        shards.push(spawn_shard(s, weights).await?);
    }

    Ok(shards)
}

fn backoff() -> Backoff {
    Backoff {
        base: Duration::from_millis(5),
        max: Duration::from_millis(20),
    }
}

fn client(shards: &[Shard], token: CancellationToken) -> ShardedClient {
    let addrs: Vec<_> = shards.iter().map(|s| s.addr).collect();
    ShardedClient::new(&addrs, backoff(), token).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_model_is_interleaved_in_global_order() -> io::Result<()> {
    let shards = spawn_shards().await?;
    let mut client = client(&shards, CancellationToken::new());

    client.connect().await?;
    assert!(client.is_connected());

    let model = client.get_full_model(8).await?;
    assert_eq!(model, vec![0., 10., 1., 11., 2., 12., 3., 13.]);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subset_then_gradient_round_trip() -> io::Result<()> {
    let shards = spawn_shards().await?;
    let mut client = client(&shards, CancellationToken::new());
    client.connect().await?;

    let batch: SparseDataset = [
        SparseSample::new(Some(1.), vec![(1, 1.), (4, 1.)]),
        SparseSample::new(Some(0.), vec![(4, 2.)]),
    ]
    .into_iter()
    .collect();

    let model = client.get_model_subset(&batch).await?;
    assert_eq!(model.len(), 2);
    assert_eq!(model.get(1), Some(10.));
    assert_eq!(model.get(4), Some(2.));

    let grad: SparseGradient = [(1, 2.), (4, -1.)].into_iter().collect();
    client.send_gradient(&grad).await?;

    assert_eq!(shards[0].store.pull_all().await, vec![0., 1., 1., 3.]);
    assert_eq!(shards[1].store.pull_all().await, vec![12., 11., 12., 13.]);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dead_shard_is_named_in_the_send_failure() -> io::Result<()> {
    let mut shards = spawn_shards().await?;
    let mut client = client(&shards, CancellationToken::new());
    client.connect().await?;

    let dead = shards.pop().unwrap();
    dead.token.cancel();
    dead.task.await??;

    let grad: SparseGradient = [(0, 1.), (1, 1.)].into_iter().collect();
    let err = client.send_gradient(&grad).await.unwrap_err();

    match err {
        WorkerErr::PartialSendFailure { shards } => assert_eq!(shards, vec![1]),
        e => panic!("expected a partial send failure, got {e}"),
    }

    assert_eq!(shards[0].store.pull_all().await, vec![1., 1., 2., 3.]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_fetch_names_the_shard() -> io::Result<()> {
    let mut shards = spawn_shards().await?;
    let mut client = client(&shards, CancellationToken::new());
    client.connect().await?;

    let dead = shards.pop().unwrap();
    dead.token.cancel();
    dead.task.await??;

    let err = client.get_full_model(8).await.unwrap_err();
    assert!(matches!(err, WorkerErr::ModelFetchError { shard: 1, .. }));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_retries_until_cancelled() -> io::Result<()> {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?
    };

    let token = CancellationToken::new();
    let mut client = ShardedClient::new(&[addr], backoff(), token.clone()).unwrap();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let res = timeout(Duration::from_secs(5), client.connect())
        .await
        .expect("connect ignored the cancellation");

    assert!(matches!(res, Err(WorkerErr::Cancelled)));
    assert!(!client.is_connected());
    canceller.await.unwrap();

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_waits_for_a_late_shard() -> io::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let mut client = ShardedClient::new(&[addr], backoff(), CancellationToken::new()).unwrap();
    let connecting = tokio::spawn(async move {
        client.connect().await?;
        client.get_full_model(2).await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let listener = TcpListener::bind(addr).await?;
    let store = StoreHandle::new(WeightStore::new(vec![4., 2.], GradientDescent::new(1.)));
    let server = ShardServer::new(0, store);
    let token = CancellationToken::new();
    let serving = tokio::spawn({
        let token = token.clone();
        async move { server.serve(listener, token).await }
    });

    let model = timeout(Duration::from_secs(5), connecting).await??.unwrap();
    assert_eq!(model, vec![4., 2.]);

    token.cancel();
    serving.await?
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subset_holds_exactly_the_dataset_indices() -> io::Result<()> {
    const FEATURES: u64 = 64;

    let batch: SparseDataset = (0..10u64)
        .map(|i| SparseSample::new(Some(1.), vec![(i, 1.), (20 + i * 3, 1.)]))
        .collect();
    let expected: BTreeSet<_> = batch.indices().collect();

    for n in 1..=4usize {
        let mut shards = Vec::new();
        for s in 0..n {
            let len = comms::router::local_len(FEATURES, s, n.try_into().unwrap()) as usize;
            shards.push(spawn_shard(s, vec![s as f32; len]).await?);
        }

        let mut client = client(&shards, CancellationToken::new());
        client.connect().await?;

        let model = client.get_model_subset(&batch).await?;
        let got: BTreeSet<_> = model.indices().collect();
        assert_eq!(got, expected, "{n} shards");

        for index in expected.iter().copied() {
            assert_eq!(model.get(index), Some((index % n as u64) as f32));
        }

        shards.iter().for_each(|s| s.token.cancel());
    }

    Ok(())
}
