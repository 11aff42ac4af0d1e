//! An in-process duplex pipe.
//!
//! [`duplex`] returns two connected [`PipeStream`]s: bytes written to
//! one are read from the other. Each direction is a separate channel,
//! so the stream's input and output contexts are distinct objects.
//! Dropping one end signals end-of-stream to the other.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use bytes::{Buf, BytesMut};

use crate::error::{Poll, PollResult, Result, Retry};
use crate::transport::{Contexts, IoMode, StreamContext, StreamType, Transport};

#[derive(Default)]
struct ChannelState {
    data: BytesMut,
    closed: bool,
}

/// One direction of the pipe.
#[derive(Default)]
struct Channel {
    state: Mutex<ChannelState>,
    readable: Condvar,
}

impl Channel {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.lock().closed = true;
        self.readable.notify_all();
    }
}

/// One end of a [`duplex`] pipe.
pub struct PipeStream {
    rx: Arc<Channel>,
    tx: Arc<Channel>,
    contexts: Contexts,
    mode: IoMode,
}

/// Create a connected pair of blocking pipe ends.
pub fn duplex() -> (PipeStream, PipeStream) {
    let left_to_right = Arc::new(Channel::default());
    let right_to_left = Arc::new(Channel::default());

    let left = PipeStream::new(right_to_left.clone(), left_to_right.clone());
    let right = PipeStream::new(left_to_right, right_to_left);

    (left, right)
}

impl PipeStream {
    fn new(rx: Arc<Channel>, tx: Arc<Channel>) -> Self {
        Self {
            rx,
            tx,
            contexts: Contexts::Split {
                input: StreamContext::new(StreamType::Virtual),
                output: StreamContext::new(StreamType::Virtual),
            },
            mode: IoMode::Blocking,
        }
    }

    /// Number of bytes written by the peer and not yet read.
    pub fn available(&self) -> usize {
        self.rx.lock().data.len()
    }
}

impl Transport for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> PollResult<usize> {
        let mut state = self.rx.lock();
        loop {
            if !state.data.is_empty() {
                let n = std::cmp::min(buf.len(), state.data.len());
                buf[..n].copy_from_slice(&state.data[..n]);
                state.data.advance(n);
                return Ok(Poll::Ready(n));
            }

            if state.closed {
                return Ok(Poll::Ready(0));
            }

            if self.mode == IoMode::NonBlocking {
                return Ok(Poll::Pending(Retry::InputLater));
            }

            state = self
                .rx
                .readable
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn write(&mut self, buf: &[u8]) -> PollResult<usize> {
        let mut state = self.tx.lock();
        if state.closed {
            return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into());
        }

        // The buffer grows as needed, so writes never have to wait.
        state.data.extend_from_slice(buf);
        drop(state);
        self.tx.readable.notify_all();
        Ok(Poll::Ready(buf.len()))
    }

    fn contexts(&self) -> &Contexts {
        &self.contexts
    }

    fn io_mode(&self) -> IoMode {
        self.mode
    }

    fn set_io_mode(&mut self, mode: IoMode) -> Result<()> {
        self.mode = mode;
        Ok(())
    }

    fn shutdown_output(&mut self) -> Result<()> {
        self.tx.close();
        Ok(())
    }
}

impl Drop for PipeStream {
    fn drop(&mut self) {
        self.tx.close();
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn bytes_flow_both_ways() {
        let (mut left, mut right) = duplex();

        assert_eq!(left.write(b"ping").unwrap(), Poll::Ready(4));
        assert_eq!(right.available(), 4);

        let mut buf = [0u8; 8];
        assert_eq!(right.read(&mut buf).unwrap(), Poll::Ready(4));
        assert_eq!(&buf[..4], b"ping");

        assert_eq!(right.write(b"pong!").unwrap(), Poll::Ready(5));
        assert_eq!(left.read(&mut buf[..2]).unwrap(), Poll::Ready(2));
        assert_eq!(left.read(&mut buf).unwrap(), Poll::Ready(3));
        assert_eq!(&buf[..3], b"ng!");
    }

    #[test]
    fn contexts_are_split() {
        let (left, _right) = duplex();
        assert!(!left.contexts().is_shared());
        assert_eq!(left.contexts().input().stream_type(), StreamType::Virtual);
    }

    #[test]
    fn non_blocking_read_reports_input_later() {
        let (mut left, _right) = duplex();
        left.set_io_mode(IoMode::NonBlocking).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(
            left.read(&mut buf).unwrap(),
            Poll::Pending(Retry::InputLater)
        );
    }

    #[test]
    fn blocking_read_waits_for_peer() {
        let (mut left, mut right) = duplex();

        let writer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            right.write(b"late").unwrap();
            right
        });

        let mut buf = [0u8; 8];
        assert_eq!(left.read(&mut buf).unwrap(), Poll::Ready(4));
        assert_eq!(&buf[..4], b"late");
        drop(writer.join().unwrap());
    }

    #[test]
    fn dropping_peer_signals_end_of_stream() {
        let (mut left, mut right) = duplex();
        right.write(b"tail").unwrap();
        drop(right);

        let mut buf = [0u8; 8];
        assert_eq!(left.read(&mut buf).unwrap(), Poll::Ready(4));
        assert_eq!(left.read(&mut buf).unwrap(), Poll::Ready(0));
        assert!(matches!(
            left.write(b"lost"),
            Err(Error::Transport(e)) if e.kind() == std::io::ErrorKind::BrokenPipe
        ));
    }

    #[test]
    fn shutdown_output_half_closes() {
        let (mut left, mut right) = duplex();
        left.write(b"tail").unwrap();
        left.shutdown_output().unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(right.read(&mut buf).unwrap(), Poll::Ready(4));
        assert_eq!(right.read(&mut buf).unwrap(), Poll::Ready(0));
        assert!(left.write(b"more").is_err());

        assert_eq!(right.write(b"back").unwrap(), Poll::Ready(4));
        assert_eq!(left.read(&mut buf).unwrap(), Poll::Ready(4));
    }
}
