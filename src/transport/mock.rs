//! Mock transport for testing
//!
//! Replays scripted device replies without any hardware attached. It provides:
//! - A reply queue: each write releases the next scripted reply into the input
//! - Pre-loaded stale input, to exercise input draining
//! - A log of every write for test verification
//! - Counters for empty (timed-out) reads and the timeouts that were set
//! - One-shot write failure injection
//!
//! Clones share state, so a test can keep a handle while a session owns the
//! transport.

use super::Transport;
use crate::error::CrsResult;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    input: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    timeouts: Vec<Duration>,
    empty_reads: usize,
    fail_next_write: bool,
}

/// Mock transport
///
/// # Example
///
/// ```
/// use crs_devices::transport::{MockTransport, Transport};
///
/// let mut mock = MockTransport::new();
/// mock.queue_reply(b"OK00\n\r>");
/// mock.write(b"UZC\n").unwrap();
/// assert_eq!(mock.read(4).unwrap(), b"OK00");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create an idle mock with no input and no scripted replies
    pub fn new() -> Self {
        Self::default()
    }

    /// Put bytes in the input buffer before any command is sent
    pub fn with_stale_input(self, bytes: impl AsRef<[u8]>) -> Self {
        self.push_input(bytes);
        self
    }

    /// Append bytes to the input buffer immediately
    pub fn push_input(&self, bytes: impl AsRef<[u8]>) {
        self.state.lock().input.extend(bytes.as_ref().iter().copied());
    }

    /// Script the reply released by the next unanswered write.
    ///
    /// An empty reply models a device that stays silent.
    pub fn queue_reply(&self, bytes: impl AsRef<[u8]>) {
        self.state.lock().replies.push_back(bytes.as_ref().to_vec());
    }

    /// Make the next write fail with a broken-pipe error
    pub fn trigger_write_failure(&self) {
        self.state.lock().fail_next_write = true;
    }

    /// Every write, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// Every write decoded as text
    pub fn written_commands(&self) -> Vec<String> {
        self.state
            .lock()
            .written
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    /// Number of reads that found no input (each one a timeout on real hardware)
    pub fn empty_reads(&self) -> usize {
        self.state.lock().empty_reads
    }

    /// Timeouts set through [`Transport::set_timeout`], in order
    pub fn timeouts(&self) -> Vec<Duration> {
        self.state.lock().timeouts.clone()
    }

    /// Scripted replies not yet released
    pub fn pending_replies(&self) -> usize {
        self.state.lock().replies.len()
    }
}

impl Transport for MockTransport {
    fn read(&mut self, n: usize) -> CrsResult<Vec<u8>> {
        let mut state = self.state.lock();
        let count = n.min(state.input.len());
        if count == 0 {
            state.empty_reads += 1;
            return Ok(Vec::new());
        }
        Ok(state.input.drain(..count).collect())
    }

    fn write(&mut self, bytes: &[u8]) -> CrsResult<()> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_write) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure").into());
        }

        state.written.push(bytes.to_vec());
        if let Some(reply) = state.replies.pop_front() {
            state.input.extend(reply);
        }
        Ok(())
    }

    fn flush(&mut self) -> CrsResult<()> {
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> CrsResult<()> {
        self.state.lock().timeouts.push(timeout);
        Ok(())
    }

    fn bytes_waiting(&mut self) -> CrsResult<usize> {
        Ok(self.state.lock().input.len())
    }

    fn describe(&self) -> String {
        "MockTransport".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_releases_next_reply() {
        let mut mock = MockTransport::new();
        mock.queue_reply(b"first");
        mock.queue_reply(b"second");

        mock.write(b"A").unwrap();
        assert_eq!(mock.bytes_waiting().unwrap(), 5);
        assert_eq!(mock.read(16).unwrap(), b"first");

        mock.write(b"B").unwrap();
        assert_eq!(mock.read(16).unwrap(), b"second");
        assert_eq!(mock.pending_replies(), 0);
    }

    #[test]
    fn empty_read_is_counted() {
        let mut mock = MockTransport::new();
        assert!(mock.read(1).unwrap().is_empty());
        assert!(mock.read(1).unwrap().is_empty());
        assert_eq!(mock.empty_reads(), 2);
    }

    #[test]
    fn clones_share_state() {
        let handle = MockTransport::new();
        let mut owned = handle.clone();

        owned.write(b"IDR\n").unwrap();
        assert_eq!(handle.written_commands(), vec!["IDR\n".to_string()]);
    }

    #[test]
    fn write_failure_is_one_shot() {
        let mut mock = MockTransport::new();
        mock.trigger_write_failure();

        assert!(mock.write(b"MES\n").is_err());
        assert!(mock.write(b"MES\n").is_ok());
        assert_eq!(mock.written().len(), 1);
    }

    #[test]
    fn stale_input_is_waiting() {
        let mut mock = MockTransport::new().with_stale_input(b">\n\r");
        assert_eq!(mock.bytes_waiting().unwrap(), 3);
    }
}
