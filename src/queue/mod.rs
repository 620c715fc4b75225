//! Durable task queue.
//!
//! A single JSON document holds four partitions (`pending`, `processing`,
//! `completed`, `failed`). `store::QueueStore` owns the read-modify-write
//! critical section; `store::QueueHandle` is the async-facing clone-able handle
//! shared by the worker, the HTTP surface and the CLI.

pub mod models;
pub mod store;

pub use models::{QueueSnapshot, QueueStats, Task, TaskOptions, TaskResult, TaskStatus, new_task_id};
pub use store::{QueueHandle, QueueStore};
