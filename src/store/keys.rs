//! Key layout in the backing store
//!
//! Every key of a queue carries the queue name as a hash tag so that a
//! clustered engine places all of them in one slot; the atomic scripts
//! touch several partition logs at once.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Append-only log of one partition
    pub fn partition(&self, queue: &str, partition: u32) -> String {
        format!("{}:{{{}}}:p:{}", self.namespace, queue, partition)
    }

    /// All partition logs of a queue, in index order
    pub fn partitions(&self, queue: &str, count: u32) -> Vec<String> {
        (0..count).map(|idx| self.partition(queue, idx)).collect()
    }

    /// Sorted staging area for delayed messages
    pub fn staging(&self, queue: &str) -> String {
        format!("{}:{{{}}}:delayed", self.namespace, queue)
    }
}
