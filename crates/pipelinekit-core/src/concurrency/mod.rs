//! Concurrency and resource-bounding primitives: the backpressure
//! semaphore every layer that limits concurrent work is built on
//! (pipeline-level `max_concurrency`, bulkhead partitions), and the
//! bounded object pool used by poolable resources.

pub mod pool;
pub mod semaphore;

pub use pool::{ObjectPool, PoolConfig, PoolStats, PooledGuard};
pub use semaphore::{
    AcquireFuture, BackpressureSemaphore, OverflowStrategy, Permit, Priority, SemaphoreConfig,
    SemaphoreStats,
};
