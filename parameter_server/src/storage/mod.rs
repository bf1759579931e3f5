mod error;
mod handle;
mod store;

pub use error::{Result, StorageErr};
pub use handle::StoreHandle;
pub use store::WeightStore;
