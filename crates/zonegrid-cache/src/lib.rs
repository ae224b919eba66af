//! # zonegrid-cache
//!
//! Keeps a fast key/value store and a slower system of record in sync.
//!
//! - [`CacheAside`]: lazy population on read, writes straight to the source
//! - [`WriteThrough`]: every write commits to both sides or neither
//! - [`WriteBehind`]: writes hit the store now and the source in batches later
//!
//! Every strategy implements [`CacheStrategy`] and honours a caller-supplied
//! [`Deadline`] on calls that reach the external system.

pub mod aside;
pub mod behind;
pub mod error;
pub mod layer;
mod locks;
pub mod memory;
pub mod through;
pub mod traits;

pub use aside::CacheAside;
pub use behind::{WriteBehind, WriteBehindConfig, WriteBehindStats};
pub use error::{CacheError, CacheResult};
pub use layer::{CacheLayer, CacheMode};
pub use memory::{MemoryDeadLetters, MemorySource, MemoryStore};
pub use through::WriteThrough;
pub use traits::{
    CacheKey, CacheStrategy, CacheValue, Change, DeadLetter, DeadLetterSink, Deadline,
    ExternalSource, KvStore, within,
};
