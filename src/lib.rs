//! taskhub: hub-side synchronization core for distributed task
//! orchestration: CEP pattern matching and dispatch, the sync/diff command
//! protocol, per-instance locking, a state-chart bridge, and the family-tree
//! index of task instances.

pub mod cep;
pub mod config;
pub mod error;
pub mod fsm;
pub mod runtime;
pub mod sync;
