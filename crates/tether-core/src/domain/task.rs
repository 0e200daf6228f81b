//! Task trait - the capability set every deferred operation exposes.
//!
//! # Trait Bounds
//! - `Serialize` / `DeserializeOwned`: records are persisted by the Store
//! - `Clone`: a worker owns its copy while the Store keeps the original
//! - `Send + Sync + 'static`: tasks move across worker tasks

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Stable identity of a task, used for deduplication and the in-flight lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKey(String);

impl TaskKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// `kind:part:part...`, with `%` and `:` escaped inside each part so
    /// distinct field values never produce the same key.
    pub fn from_parts(kind: &str, parts: &[&str]) -> Self {
        let mut key = String::from(kind);
        for part in parts {
            key.push(':');
            for c in part.chars() {
                match c {
                    '%' => key.push_str("%25"),
                    ':' => key.push_str("%3A"),
                    c => key.push(c),
                }
            }
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A unit of deferred work which must eventually succeed.
///
/// The engine is at-least-once: an implementation must be safe to execute
/// more than once.
///
/// # Example
/// ```ignore
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct PurgeTask { digest: String }
///
/// impl Task for PurgeTask {
///     fn key(&self) -> TaskKey { TaskKey::new(format!("purge:{}", self.digest)) }
///     fn kind(&self) -> &'static str { "purge" }
/// }
/// ```
pub trait Task: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    /// Identity used for deduplication and mutual exclusion.
    fn key(&self) -> TaskKey;

    /// Name of the concrete kind (handler routing, logs).
    fn kind(&self) -> &'static str;

    fn describe(&self) -> String {
        self.key().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_serializes_as_plain_string() {
        let key = TaskKey::new("writeback:library:sha256:abc");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"writeback:library:sha256:abc\"");

        let back: TaskKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn parts_containing_the_separator_do_not_collide() {
        let a = TaskKey::from_parts("writeback", &["a:b", "c"]);
        let b = TaskKey::from_parts("writeback", &["a", "b:c"]);
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "writeback:a%3Ab:c");
        assert_eq!(b.as_str(), "writeback:a:b%3Ac");

        let literal = TaskKey::from_parts("writeback", &["a%3Ab", "c"]);
        assert_ne!(literal, a);
    }

    #[test]
    fn keys_order_lexicographically() {
        let a = TaskKey::from("blob-A");
        let b = TaskKey::from("blob-B");
        assert!(a < b);
        assert_eq!(a.to_string(), "blob-A");
    }
}
