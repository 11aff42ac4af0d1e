//! The one-shot handshake of a [`Connection`].
//!
//! [`HandshakeState::advance`] is the pure transition function; the
//! connection applies it to the outcome of every engine call. A
//! [`Handshake`] is a resumable task which an external scheduler
//! drives one engine call at a time.

use crate::{
    action::Action,
    connection::Connection,
    error::{ErrorKind, Poll, PollResult, Result},
    transport::Transport,
    Role,
};

/// Progress of a connection's handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    /// No handshake call has been made yet
    Uninitialized,
    /// At least one call has been made; the role is fixed from now on
    Handshaking(Role),
    /// The session is established. Never left.
    Complete,
    /// The handshake failed. Never left.
    Failed(ErrorKind),
}

impl HandshakeState {
    /// Whether the session is established.
    pub fn is_complete(&self) -> bool {
        matches!(self, HandshakeState::Complete)
    }

    /// Whether the handshake failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, HandshakeState::Failed(_))
    }

    /// The state after one handshake call made in `role` returned
    /// `outcome`.
    pub fn advance(self, role: Role, outcome: &PollResult<()>) -> Self {
        match self {
            HandshakeState::Complete | HandshakeState::Failed(_) => self,
            HandshakeState::Uninitialized | HandshakeState::Handshaking(_) => match outcome {
                Ok(Poll::Ready(())) => HandshakeState::Complete,
                Ok(Poll::Pending(_)) => HandshakeState::Handshaking(role),
                Err(e) => HandshakeState::Failed(e.kind()),
            },
        }
    }
}

/// What [`Handshake::resume`] asks of its scheduler.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step {
    /// Suspend as instructed, then call [`Handshake::resume`] again.
    Yield(Action),
    /// The connection is established; the task is finished.
    Complete,
}

/// A resumable handshake task returned by [`Connection::init_async`].
///
/// It holds no reference to the connection, only its own bookkeeping,
/// so any number of tasks can be driven against one connection: the
/// first to observe completion establishes the session and the others
/// finish on their next resumption without calling the engine again.
#[derive(Debug, Default)]
pub struct Handshake {
    role: Option<Role>,
    suspensions: usize,
}

impl Handshake {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes one handshake call on `conn`.
    ///
    /// On a retry the task suspends, yielding the scheduling
    /// instruction of the underlying transport for the direction the
    /// engine is waiting on.
    pub fn resume<T: Transport>(&mut self, conn: &mut Connection<T>) -> Result<Step> {
        let role = *self.role.get_or_insert(conn.role());
        debug_assert_eq!(role, conn.role());

        match conn.handshake_step()? {
            Poll::Ready(()) => Ok(Step::Complete),
            Poll::Pending(retry) => {
                self.suspensions += 1;
                log::trace!("{role} handshake suspended ({retry:?})");
                conn.suggest_retry_action(retry).map(Step::Yield)
            }
        }
    }

    /// The role fixed at the first resumption.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// How many times this task has yielded.
    pub fn suspensions(&self) -> usize {
        self.suspensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Retry};
    use test_case::test_case;

    fn failed() -> PollResult<()> {
        Err(Error::from(std::io::Error::from(
            std::io::ErrorKind::ConnectionReset,
        )))
    }

    #[test_case(HandshakeState::Uninitialized, Ok(Poll::Pending(Retry::InputLater)) => HandshakeState::Handshaking(Role::Client))]
    #[test_case(HandshakeState::Uninitialized, Ok(Poll::Ready(())) => HandshakeState::Complete)]
    #[test_case(HandshakeState::Handshaking(Role::Client), Ok(Poll::Pending(Retry::OutputNow)) => HandshakeState::Handshaking(Role::Client))]
    #[test_case(HandshakeState::Handshaking(Role::Client), Ok(Poll::Ready(())) => HandshakeState::Complete)]
    #[test_case(HandshakeState::Complete, Ok(Poll::Pending(Retry::InputLater)) => HandshakeState::Complete; "complete is never left")]
    #[test_case(HandshakeState::Complete, failed() => HandshakeState::Complete; "complete ignores failure")]
    fn advance(state: HandshakeState, outcome: PollResult<()>) -> HandshakeState {
        state.advance(Role::Client, &outcome)
    }

    #[test]
    fn failure_is_absorbing() {
        let state = HandshakeState::Handshaking(Role::Server).advance(Role::Server, &failed());
        assert!(state.is_failed());
        assert!(matches!(
            &state,
            HandshakeState::Failed(ErrorKind::Io {
                kind: std::io::ErrorKind::ConnectionReset,
                ..
            })
        ));

        let state = state.advance(Role::Server, &Ok(Poll::Ready(())));
        assert!(state.is_failed());
        assert!(!state.is_complete());
    }
}
