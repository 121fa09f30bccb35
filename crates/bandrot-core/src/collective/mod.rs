//! Collective communication between a fixed group of workers.
//!
//! A [`ProcessGroup`] of N workers runs the same function on N threads, each
//! holding its own [`Communicator`]. Workers share no mutable state; the only
//! way data crosses between them is through collectives:
//!
//! - **broadcast**: one root sends a value, every worker ends up owning a copy
//! - **gather**: every worker contributes a value, the root receives all of
//!   them in rank order
//!
//! # Architecture
//!
//! Each rank owns an unbounded `crossbeam-channel` inbox and a sender to every
//! other rank. Messages are tagged with the sender's rank and the sequence
//! number of the collective call, and receivers match on both. A message that
//! shows up before its collective is parked until that call asks for it.
//!
//! Each rank also holds a liveness channel that is never written to. When a
//! rank's communicator is dropped, a peer blocked on that rank wakes up
//! immediately instead of waiting on messages that can no longer come.
//!
//! # Failure Handling
//!
//! - With a timeout configured, a receive that waits past it fails with
//!   [`CollectiveError::Timeout`] naming the silent peer
//! - [`Communicator::broadcast_untimed`] waits on the root with no deadline
//! - When the peer a receive is waiting on has gone away, the receive fails
//!   with [`CollectiveError::Disconnected`]
//! - A panicking worker is reported by [`ProcessGroup::run`] and
//!   [`ProcessGroup::run_rooted`] as [`CollectiveError::WorkerPanicked`]

mod communicator;
mod group;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub use communicator::Communicator;
pub use group::{ProcessGroup, RootedResults};

/// The collective a worker was executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Broadcast,
    Gather,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Broadcast => f.write_str("broadcast"),
            Operation::Gather => f.write_str("gather"),
        }
    }
}

/// Error types for collective operations.
#[derive(Debug, Error)]
pub enum CollectiveError {
    /// A group was requested with zero workers.
    #[error("Process group needs at least one worker")]
    EmptyGroup,

    /// The root rank does not exist in this group.
    #[error("Root rank {root} is outside a group of {size}")]
    InvalidRoot { root: usize, size: usize },

    /// The root of a broadcast supplied nothing to send.
    #[error("Rank {rank} is the {operation} root but has no value to send")]
    MissingRootValue { rank: usize, operation: Operation },

    /// A peer did not deliver within the group timeout.
    #[error("Rank {rank} timed out after {timeout:?} waiting for rank {peer} in {operation}")]
    Timeout {
        rank: usize,
        peer: usize,
        operation: Operation,
        timeout: Duration,
    },

    /// A peer went away before the collective completed.
    #[error("Rank {rank} lost contact with rank {peer} during {operation}")]
    Disconnected {
        rank: usize,
        peer: usize,
        operation: Operation,
    },

    /// A worker thread panicked.
    #[error("Worker {rank} panicked")]
    WorkerPanicked { rank: usize },

    /// A collective delivered a message of the wrong kind.
    #[error("Rank {rank} expected {expected} but received {actual}")]
    UnexpectedMessage {
        rank: usize,
        expected: &'static str,
        actual: &'static str,
    },
}
