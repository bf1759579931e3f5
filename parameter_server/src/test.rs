#![cfg(test)]

use std::time::Duration;

use comms::{
    Deserialize, PsReceiver, PsSender,
    msg::{Ack, Empty, GradientShard, IndexList, ModelValues, Operation},
};
use tokio::{
    io::{self, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf},
    net::TcpListener,
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

use crate::{
    optimization::GradientDescent,
    service::{ShardServer, handle_connection},
    storage::{StoreHandle, WeightStore},
};

type Channel = (
    PsReceiver<ReadHalf<DuplexStream>>,
    PsSender<WriteHalf<DuplexStream>>,
);

fn channel_pair() -> (Channel, Channel) {
    let (stream1, stream2) = io::duplex(4096);
    let (rx1, tx1) = io::split(stream1);
    let (rx2, tx2) = io::split(stream2);
    let chan1 = comms::channel(rx1, tx1);
    let chan2 = comms::channel(rx2, tx2);
    (chan1, chan2)
}

fn spawn_shard(
    weights: Vec<f32>,
    lr: f32,
) -> (
    StoreHandle<GradientDescent>,
    Channel,
    CancellationToken,
    JoinHandle<io::Result<()>>,
) {
    let store = StoreHandle::new(WeightStore::new(weights, GradientDescent::new(lr)));
    let ((rx, tx), worker) = channel_pair();
    let token = CancellationToken::new();

    let task = tokio::spawn(handle_connection(store.clone(), rx, tx, token.clone()));
    (store, worker, token, task)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gradient_then_subset_reflects_the_update() -> io::Result<()> {
    let (_, (mut rx, mut tx), _, task) = spawn_shard(vec![0., 1., 2., 3.], 0.5);

    let shard = GradientShard {
        entries: vec![(0, 2.), (3, -2.)],
        version: 1,
    };
    tx.send_request(Operation::SendGradient, &shard).await?;
    let ack = Ack::deserialize(rx.recv_response().await?).unwrap();
    assert_eq!(ack.applied, 2);

    let list = IndexList {
        indices: vec![3, 1, 0],
    };
    tx.send_request(Operation::GetModelSubset, &list).await?;
    let values = ModelValues::deserialize(rx.recv_response().await?).unwrap();
    assert_eq!(values.values, vec![2., 1., 1.]);

    tx.send_request(Operation::GetFullModel, &Empty).await?;
    let values = ModelValues::deserialize(rx.recv_response().await?).unwrap();
    assert_eq!(values.values, vec![1., 1., 2., 2.]);

    drop(tx);
    drop(rx);
    task.await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_subset_gets_empty_answer() -> io::Result<()> {
    let (_, (mut rx, mut tx), _, _task) = spawn_shard(vec![1.; 4], 1.);

    tx.send_request(Operation::GetModelSubset, &IndexList::default())
        .await?;
    let values = ModelValues::deserialize(rx.recv_response().await?).unwrap();
    assert!(values.values.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn out_of_range_index_closes_the_connection() -> io::Result<()> {
    let (store, (mut rx, mut tx), _, task) = spawn_shard(vec![0.; 2], 1.);

    let shard = GradientShard {
        entries: vec![(0, 1.), (5, 1.)],
        version: 1,
    };
    tx.send_request(Operation::SendGradient, &shard).await?;

    let err = rx.recv_response().await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    assert_eq!(store.pull_all().await, vec![0., 0.]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_operation_is_rejected() -> io::Result<()> {
    let store = StoreHandle::new(WeightStore::new(vec![0.; 2], GradientDescent::new(1.)));
    let (one, mut two) = io::duplex(256);
    let (rx, tx) = io::split(one);
    let (rx, tx) = comms::channel(rx, tx);

    let mut frame = Vec::new();
    frame.extend_from_slice(&9u32.to_be_bytes());
    frame.extend_from_slice(&0u32.to_be_bytes());
    two.write_all(&frame).await?;

    let err = handle_connection(store, rx, tx, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_ends_an_idle_connection() -> io::Result<()> {
    let (_, _worker, token, task) = spawn_shard(vec![0.; 2], 1.);

    token.cancel();
    let res = timeout(Duration::from_secs(1), task).await.unwrap();
    res.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn serve_accepts_workers_until_cancelled() -> io::Result<()> {
    let store = StoreHandle::new(WeightStore::new(vec![7.; 3], GradientDescent::new(1.)));
    let server = ShardServer::new(0, store);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let token = CancellationToken::new();

    let serving = {
        let token = token.clone();
        tokio::spawn(async move { server.serve(listener, token).await })
    };

    let stream = tokio::net::TcpStream::connect(addr).await?;
    let (rx, tx) = stream.into_split();
    let (mut rx, mut tx) = comms::channel(rx, tx);

    tx.send_request(Operation::GetFullModel, &Empty).await?;
    let values = ModelValues::deserialize(rx.recv_response().await?).unwrap();
    assert_eq!(values.values, vec![7.; 3]);

    token.cancel();
    timeout(Duration::from_secs(1), serving).await.unwrap().unwrap()?;

    assert!(rx.recv_response().await.is_err());
    Ok(())
}
