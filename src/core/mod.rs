//! Core services and infrastructure

pub mod logging;
pub mod retry;
pub mod shutdown;
pub mod time;
