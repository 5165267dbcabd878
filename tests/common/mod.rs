//! Shared helpers for integration tests

use partq::queue::{handler_fn, ClientConfig, HandlerError, Message, MessageHandler, QueueConfig};
use partq::queue::RetryConfig;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Environment variable naming a live store for `#[ignore]`d tests
pub const REDIS_URL_VAR: &str = "PARTQ_REDIS_URL";

/// Client config with short timeouts around a single queue
pub fn client_config(queue: &str, config: QueueConfig) -> ClientConfig {
    ClientConfig::new()
        .block_timeout(Duration::from_millis(100))
        .producer_retry(RetryConfig::fixed(3, 10))
        .commit_retry(RetryConfig::fixed(3, 10))
        .queue(queue, config)
}

pub type Seen = Arc<Mutex<Vec<Message>>>;

pub fn recorder(seen: Seen) -> impl MessageHandler {
    handler_fn(move |batch: Vec<Message>| {
        let seen = seen.clone();
        async move {
            seen.lock().unwrap().extend(batch);
            Ok::<(), HandlerError>(())
        }
    })
}

pub fn values(seen: &Seen) -> Vec<String> {
    seen.lock().unwrap().iter().map(|m| m.value.clone()).collect()
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Live store URL, or `None` when the variable is unset
pub fn redis_url() -> Option<String> {
    std::env::var(REDIS_URL_VAR).ok().filter(|url| !url.is_empty())
}

/// Namespace unique to one test run so live tests never collide
pub fn unique_namespace(test: &str) -> String {
    format!("partq-test-{}-{}", test, std::process::id())
}
