//! End-to-end queue tests through the public client API
//!
//! Suites under `tests/queue/` run on the in-memory store. The `live_redis`
//! suite is `#[ignore]`d and needs `PARTQ_REDIS_URL` pointing at a
//! disposable Redis-compatible server:
//!
//! ```text
//! PARTQ_REDIS_URL=redis://127.0.0.1:6379/15 cargo test -- --ignored
//! ```

mod common;
mod queue;
