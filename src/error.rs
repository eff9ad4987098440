use thiserror::Error;

/// Errors raised by the hub core. Transport failures during remote sync are
/// deliberately NOT here: they are recovered locally (logged, `None` returned)
/// and the caller decides whether to retry.
#[derive(Error, Debug)]
pub enum HubError {
    /// The response from a remote processor could not be decoded into a Task.
    /// Fatal to the current dispatch.
    #[error("wire decode failed: {0}")]
    WireDecode(String),

    /// A task carried an error but no error task could be resolved.
    #[error("no error task found for {0}")]
    MissingErrorTask(String),

    /// A command referenced an instance that is not in the store.
    #[error("no active task for instance {0}")]
    MissingInstance(String),

    /// Lock acquisition exceeded the configured timeout policy.
    #[error("lock acquisition timed out for key {0}")]
    LockTimeout(String),

    /// A match rule referenced a CEP name with no registered handler.
    #[error("no CEP registered under name {0}")]
    UnknownCep(String),

    /// A regex match rule failed to compile.
    #[error("invalid match pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}
