//! Carried request-scoped values.
//!
//! [`Values`] is an immutable, singly linked chain of key/value bindings.
//! Attaching a value never mutates the chain it was attached to; it returns
//! a child view that sees the new binding plus everything its parent saw.
//! Middleware hands a child view forward by replacing
//! [`Context::values`](crate::Context::values); earlier middleware keeps
//! whatever view it had.
//!
//! ```rust
//! use orchard::Values;
//!
//! let root = Values::new().with_value("db", "primary".to_owned());
//! let child = root.with_value("user", 42_u64);
//!
//! assert_eq!(child.value::<String>("db").map(String::as_str), Some("primary"));
//! assert_eq!(child.value::<u64>("user"), Some(&42));
//! assert!(root.value::<u64>("user").is_none());
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// An immutable chain of request-scoped key/value pairs.
///
/// Cloning is one reference-count increment; lookups walk from the newest
/// binding to the oldest, so a child binding shadows its ancestors.
#[derive(Clone, Default)]
pub struct Values {
    head: Option<Arc<Node>>,
}

struct Node {
    key: String,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Node>>,
}

impl Values {
    /// An empty chain.
    pub fn new() -> Self {
        Self { head: None }
    }

    /// Returns a child view with `key` bound to `value`.
    pub fn with_value<T>(&self, key: impl Into<String>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            head: Some(Arc::new(Node {
                key: key.into(),
                value: Arc::new(value),
                parent: self.head.clone(),
            })),
        }
    }

    /// Looks up the nearest binding for `key`.
    ///
    /// Returns `None` when the key is unbound or when the nearest binding
    /// holds a value of a different type.
    pub fn value<T: Any>(&self, key: &str) -> Option<&T> {
        self.nodes()
            .find(|node| node.key == key)
            .and_then(|node| node.value.downcast_ref::<T>())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes().any(|node| node.key == key)
    }

    fn nodes(&self) -> impl Iterator<Item = &Node> {
        std::iter::successors(self.head.as_deref(), |node| node.parent.as_deref())
    }
}

impl fmt::Debug for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.nodes().map(|node| &node.key)).finish()
    }
}
