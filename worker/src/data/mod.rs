//! The prefetching data pipeline.
//!
//! A background thread selects byte ranges of the dataset object, fetches them from a
//! `RangeSource`, parses them into minibatches and publishes them into a bounded ring
//! the training loop consumes from.

mod parser;
mod pipeline;
mod range;
mod ring;
mod source;
mod state;

pub use parser::{LibsvmParser, ParseErr};
pub use pipeline::{PipelineCloser, PipelineConfig, PrefetchPipeline, RetryPolicy};
pub use range::RangeSelector;
pub use ring::MinibatchRing;
pub use source::{FileSource, MemorySource, RangeSource};
pub use state::{PipelineState, RunState};
