//! Error types for blinc_store

use thiserror::Error;

/// Errors raised by stores and reactive proxies
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The store configuration was rejected at construction time
    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),

    /// A mutation was attempted through a read-only view
    #[error("Cannot mutate `{key}` through a read-only view")]
    ReadOnly { key: String },

    /// A store member exists but cannot be assigned (actions, computed values)
    #[error("Store member `{member}` is not writable")]
    NotWritable { member: String },

    /// No action with this name was declared on the store
    #[error("Store '{store}' has no action named '{action}'")]
    UnknownAction { store: String, action: String },

    /// No computed value with this name was declared on the store
    #[error("Store '{store}' has no computed value named '{name}'")]
    UnknownComputed { store: String, name: String },

    /// The operation does not exist for the wrapped container shape
    #[error("`{op}` is not supported on a {shape} proxy")]
    Unsupported { op: &'static str, shape: String },

    /// Weak collections only accept containers as keys
    #[error("Invalid value used as a weak collection key: {0}")]
    InvalidWeakKey(&'static str),

    /// Array index above [`MAX_ARRAY_INDEX`](crate::value::MAX_ARRAY_INDEX),
    /// or one the array cannot grow to
    #[error("Array index {index} is out of range")]
    IndexOutOfRange { index: usize },

    /// A deep copy or serialization ran into a reference cycle
    #[error("Value contains a reference cycle")]
    CyclicValue,

    /// The queue dropped a pending call before it settled
    #[error("Queued action '{action}' was dropped before it settled")]
    QueueDropped { action: String },

    /// Failure reported by user action code
    #[error("{0}")]
    Action(String),
}

impl StoreError {
    /// Convenience constructor for errors raised from inside actions
    pub fn action(message: impl Into<String>) -> Self {
        StoreError::Action(message.into())
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
