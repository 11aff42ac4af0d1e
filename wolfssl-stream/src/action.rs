//! Translation of I/O outcomes into scheduling instructions.

use crate::error::{Error, Poll, Result, Retry};

/// The two directions of a stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Bytes flowing from the transport to the caller
    Input,
    /// Bytes flowing from the caller to the transport
    Output,
}

impl Direction {
    /// The other direction.
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Input => Direction::Output,
            Direction::Output => Direction::Input,
        }
    }

    /// The readiness condition associated with this direction.
    pub fn interest(&self) -> Interest {
        match self {
            Direction::Input => Interest::Readable,
            Direction::Output => Interest::Writable,
        }
    }
}

/// A transport readiness condition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Interest {
    /// The transport has input available
    Readable,
    /// The transport can accept output
    Writable,
}

/// What a cooperative scheduler should do with an operation that
/// returned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Action {
    /// Re-invoke immediately; progress may be possible without
    /// waiting.
    Repeat(Interest),
    /// Suspend until the transport satisfies the interest, then
    /// re-invoke.
    Wait(Interest),
}

impl Action {
    /// The readiness condition this action refers to.
    pub fn interest(&self) -> Interest {
        match self {
            Action::Repeat(interest) | Action::Wait(interest) => *interest,
        }
    }
}

/// Maps the outcome of an operation issued in `direction` onto a
/// scheduling instruction.
///
/// A retry naming the opposite direction is answered by the opposite
/// direction's producer, so the instruction always refers to the
/// readiness condition that must actually be awaited.
pub fn suggest_action(direction: Direction, result: &Poll<usize>) -> Result<Action> {
    match result {
        Poll::Ready(0) => Err(Error::Unschedulable("zero-length result")),
        Poll::Ready(_) => Ok(Action::Repeat(direction.interest())),
        Poll::Pending(retry) if retry.direction() == direction => Ok(match retry {
            Retry::InputNow | Retry::OutputNow => Action::Repeat(direction.interest()),
            Retry::InputLater | Retry::OutputLater => Action::Wait(direction.interest()),
        }),
        Poll::Pending(_) => suggest_action(direction.opposite(), result),
    }
}

/// [`suggest_action`] for an operation issued on the input side.
pub fn suggest_input_action(result: &Poll<usize>) -> Result<Action> {
    suggest_action(Direction::Input, result)
}

/// [`suggest_action`] for an operation issued on the output side.
pub fn suggest_output_action(result: &Poll<usize>) -> Result<Action> {
    suggest_action(Direction::Output, result)
}
