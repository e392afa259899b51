//! The durable command queue (C5/C6): scheduled retry backoff and the
//! background scheduler that polls, claims, and dispatches queue items.

pub mod backoff;
pub mod scheduler;
