pub mod cache;
pub mod chunk;
pub mod codec;
pub mod error;
pub mod types;

pub use cache::{Cache, DeletePolicy};
pub use chunk::Chunk;
pub use codec::ChunkRecord;
pub use error::{CacheError, Result};
pub use types::{StoreStats, StoredValue};
