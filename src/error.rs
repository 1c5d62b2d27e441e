//! Error types for the management agent.

use thiserror::Error;

use crate::type_alias::*;

/// Error type for agent and transport operations.
///
/// Only resource exhaustion and transport failures surface through this type.
/// Malformed inbound MADs are dropped on the receive path and never become
/// errors seen by a caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Allocation of a request record or I/O buffer failed.
    #[error("out of memory")]
    NoMemory,

    /// The transport could not create a completion queue.
    #[error("could not create completion queue with {0} entries")]
    CompletionQueue(usize),

    /// The transport could not create a queue pair.
    #[error("could not create queue pair")]
    QueuePair,

    /// The send queue has no free work queue entry.
    #[error("send queue of QPN {0:#x} is full")]
    SendQueueFull(Qpn),

    /// No such queue pair is known to the transport.
    #[error("no such queue pair {0:#x}")]
    NoSuchQueuePair(Qpn),

    /// No such completion queue is known to the transport.
    #[error("no such completion queue {0}")]
    NoSuchCompletionQueue(u32),

    /// A byte buffer does not hold exactly one MAD.
    #[error("bad MAD size: {0} bytes")]
    BadMadSize(usize),
}

/// Work completion errors reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("work request flushed")]
    Flushed,

    #[error("local length error")]
    LocalLength,

    #[error("local protection error")]
    LocalProtection,

    #[error("remote operation error")]
    Remote,
}

/// Result type for agent and transport operations.
pub type Result<T> = std::result::Result<T, Error>;
