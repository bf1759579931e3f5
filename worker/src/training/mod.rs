mod hogwild;
mod worker_loop;

pub use hogwild::{HogwildConfig, HogwildReport, HogwildTrainer};
pub use worker_loop::{TrainReport, Worker, WorkerContext};
