pub mod context;
pub mod dispatcher;
pub mod error_task;
pub mod lock;
pub mod redis_storage;
pub mod storage;
pub mod task;
pub mod timers;
pub mod transport;
