//! Fixed-window rate limiting and window storage.

mod backend;
mod clock;
mod limiter;
mod memory;
mod redis_store;
mod shared;
mod window;

pub use backend::Storage;
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::FixedWindowLimiter;
pub use memory::MemoryStorage;
pub use redis_store::{RedisPool, RedisWindowStore};
pub use shared::{SharedStorage, WindowReply, WindowStore, CALLS_FIELD, KEY_PREFIX, START_FIELD};
pub use window::{clamp_reset, time_until_reset, RateInfo, WindowInfo};
