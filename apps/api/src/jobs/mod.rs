//! Job lifecycle: persistence, the guarded state machine, the task queue and
//! the worker that drains it.

pub mod memory;
pub mod postgres;
pub mod queue;
pub mod store;
pub mod tasks;
pub mod tracker;
pub mod worker;
