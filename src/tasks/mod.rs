//! Background tasks owned by the server process.

pub mod cleanup;

pub use cleanup::spawn_cleanup_task;
