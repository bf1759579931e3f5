pub mod builder;
pub mod data;
pub mod error;
pub mod model;
pub mod net;
pub mod training;

pub use builder::WorkerBuilder;
pub use error::WorkerErr;
pub use training::{Worker, WorkerContext};
