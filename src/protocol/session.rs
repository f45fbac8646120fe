//! Request/response exchange over a line-based serial protocol.
//!
//! A [`SerialSession`] owns its transport exclusively. Each command is a
//! strict write-then-read exchange: stale input is drained, the command is
//! written, and reply lines are collected until the device prints its prompt
//! or the budget of consecutive empty reads runs out.

use super::reader::read_until;
use crate::error::{CrsError, CrsResult};
use crate::transport::Transport;
use std::time::Duration;
use tracing::{debug, warn, Span};

/// Longest reply line read before it is cut.
pub const MAX_LINE_BYTES: usize = 1024;

/// Line framing of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFraming {
    /// Terminator ending each reply line.
    pub eol: Vec<u8>,
    /// Line printed by the device when it is ready for the next command.
    pub prompt: Vec<u8>,
}

impl LineFraming {
    /// ColorCAL framing: `\n\r` line ends and a `>` prompt.
    pub fn colorcal() -> Self {
        Self {
            eol: b"\n\r".to_vec(),
            prompt: b">".to_vec(),
        }
    }

    fn is_noise(&self, line: &[u8]) -> bool {
        line.is_empty() || line == self.eol.as_slice() || self.is_prompt(line)
    }

    fn is_prompt(&self, line: &[u8]) -> bool {
        self.strip_eol(line) == self.prompt.as_slice()
    }

    fn strip_eol<'a>(&self, line: &'a [u8]) -> &'a [u8] {
        line.strip_suffix(self.eol.as_slice()).unwrap_or(line)
    }
}

impl Default for LineFraming {
    fn default() -> Self {
        Self::colorcal()
    }
}

/// Reply to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// No data line arrived within the attempt budget.
    Empty,
    /// Exactly one data line.
    Line(String),
    /// Several data lines, in arrival order (help text, matrix dumps).
    Lines(Vec<String>),
}

impl Reply {
    fn from_lines(mut lines: Vec<String>) -> Self {
        match lines.len() {
            0 => Reply::Empty,
            1 => Reply::Line(lines.remove(0)),
            _ => Reply::Lines(lines),
        }
    }

    /// Whether no data arrived.
    pub fn is_empty(&self) -> bool {
        matches!(self, Reply::Empty)
    }

    /// The single line, if the reply is exactly one line.
    pub fn as_line(&self) -> Option<&str> {
        match self {
            Reply::Line(line) => Some(line),
            _ => None,
        }
    }

    /// All lines of the reply.
    pub fn into_lines(self) -> Vec<String> {
        match self {
            Reply::Empty => Vec::new(),
            Reply::Line(line) => vec![line],
            Reply::Lines(lines) => lines,
        }
    }
}

/// Synchronous command session over an owned transport.
pub struct SerialSession {
    transport: Option<Box<dyn Transport>>,
    framing: LineFraming,
    max_attempts: usize,
    last_command: String,
    span: Span,
}

impl SerialSession {
    /// Create a session around an already opened transport.
    ///
    /// `span` is the logging context every event of this session is recorded
    /// in.
    pub fn new(transport: Box<dyn Transport>, max_attempts: usize, span: Span) -> Self {
        Self {
            transport: Some(transport),
            framing: LineFraming::default(),
            max_attempts,
            last_command: String::new(),
            span,
        }
    }

    /// Replace the line framing.
    pub fn with_framing(mut self, framing: LineFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Whether the transport is still held.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Most recently sent command, without its terminator.
    pub fn last_command(&self) -> &str {
        &self.last_command
    }

    /// Budget of consecutive empty reads per command.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Logging span of this session.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Release the transport. Later commands fail with `NotConnected`.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            self.span.in_scope(|| debug!("Session closed"));
        }
    }

    /// Direct access to the transport, for byte-oriented protocols.
    pub fn transport_mut(&mut self) -> CrsResult<&mut (dyn Transport + 'static)> {
        match self.transport.as_mut() {
            Some(transport) => Ok(transport.as_mut()),
            None => Err(CrsError::NotConnected),
        }
    }

    /// Send `message` and collect the reply lines.
    ///
    /// `timeout` is applied to every byte read. A write or flush failure
    /// closes the session.
    pub fn send_command(&mut self, message: &str, timeout: Duration) -> CrsResult<Reply> {
        let _entered = self.span.clone().entered();
        let transport = self.transport.as_mut().ok_or(CrsError::NotConnected)?;

        // Anything already waiting belongs to an earlier exchange.
        let waiting = transport.bytes_waiting()?;
        if waiting > 0 {
            let stale = transport.read(waiting)?;
            let mut expected_noise = self.framing.prompt.clone();
            expected_noise.extend_from_slice(&self.framing.eol);
            if stale != expected_noise && stale != self.framing.eol {
                warn!(
                    previous_command = %self.last_command,
                    stale = %String::from_utf8_lossy(&stale).escape_default(),
                    "Discarding unread reply to previous command"
                );
            }
        }

        let mut outgoing = message.to_string();
        if !outgoing.ends_with('\n') && !outgoing.ends_with("\n\r") {
            outgoing.push('\n');
        }
        self.last_command = message.trim_end().to_string();

        let written = transport
            .write(outgoing.as_bytes())
            .and_then(|()| transport.flush());
        if let Err(e) = written {
            warn!(command = %self.last_command, error = %e, "Write failed, closing session");
            self.transport = None;
            return Err(e);
        }
        transport.set_timeout(timeout)?;
        debug!(command = %self.last_command, "Sent command");

        let mut lines = Vec::new();
        let mut empty = 0;
        while empty <= self.max_attempts {
            let line = read_until(transport.as_mut(), Some(MAX_LINE_BYTES), &self.framing.eol)?;

            // A prompt before any data is left over from an earlier exchange.
            if self.framing.is_prompt(&line) && !lines.is_empty() {
                break;
            }
            if self.framing.is_noise(&line) {
                empty += 1;
                continue;
            }

            let text = String::from_utf8_lossy(self.framing.strip_eol(&line)).into_owned();
            lines.push(text);
            empty = 0;
        }

        let reply = Reply::from_lines(lines);
        debug!(command = %self.last_command, reply = ?reply, "Received reply");
        Ok(reply)
    }

    /// Send `message` and demand exactly one reply line.
    ///
    /// # Errors
    /// `Timeout` when nothing arrives, `Decode` when several lines arrive.
    pub fn query(&mut self, message: &str, timeout: Duration) -> CrsResult<String> {
        match self.send_command(message, timeout)? {
            Reply::Line(line) => Ok(line),
            Reply::Empty => Err(CrsError::Timeout {
                command: message.trim_end().to_string(),
            }),
            Reply::Lines(lines) => Err(CrsError::Decode(format!(
                "expected one line in reply to '{}', got {}",
                message.trim_end(),
                lines.len()
            ))),
        }
    }
}

impl std::fmt::Debug for SerialSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialSession")
            .field(
                "transport",
                &self.transport.as_ref().map(|transport| transport.describe()),
            )
            .field("max_attempts", &self.max_attempts)
            .field("last_command", &self.last_command)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use tracing_test::traced_test;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn session(mock: &MockTransport, max_attempts: usize) -> SerialSession {
        SerialSession::new(Box::new(mock.clone()), max_attempts, Span::none())
    }

    #[test]
    fn single_line_is_unwrapped() {
        let mock = MockTransport::new();
        mock.queue_reply(b"\n\r>\n\rOK00,1,2,3\n\r>");
        let mut session = session(&mock, 2);

        let reply = session.send_command("MES", TIMEOUT).unwrap();
        assert_eq!(reply, Reply::Line("OK00,1,2,3".to_string()));
    }

    #[test]
    fn noise_before_data_is_dropped() {
        let mock = MockTransport::new();
        mock.queue_reply(b"\n\r\n\rOK00,1.0,2.0,3.0\n\r>");
        let mut session = session(&mock, 5);

        let reply = session.send_command("MES", TIMEOUT).unwrap();
        assert_eq!(reply.as_line(), Some("OK00,1.0,2.0,3.0"));
    }

    #[test]
    fn multi_line_reply_keeps_order() {
        let mock = MockTransport::new();
        mock.queue_reply(b"IDR - identity\n\rMES - measure\n\rUZC - zero\n\r>");
        let mut session = session(&mock, 2);

        let reply = session.send_command("?", TIMEOUT).unwrap();
        assert_eq!(
            reply.into_lines(),
            vec!["IDR - identity", "MES - measure", "UZC - zero"]
        );
    }

    #[test]
    fn silent_device_gives_empty_reply_within_budget() {
        let mock = MockTransport::new();
        let mut session = session(&mock, 3);

        let reply = session.send_command("MES", TIMEOUT).unwrap();
        assert!(reply.is_empty());
        // max_attempts + 1 empty lines, each a single timed-out read.
        assert_eq!(mock.empty_reads(), 4);
        assert_eq!(mock.timeouts(), vec![TIMEOUT]);
    }

    #[test]
    fn unterminated_stream_is_cut_into_bounded_lines() {
        let mock = MockTransport::new();
        mock.queue_reply(vec![b'A'; MAX_LINE_BYTES + 500]);
        let mut session = session(&mock, 1);

        let lines = session.send_command("?", TIMEOUT).unwrap().into_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_LINE_BYTES);
        assert_eq!(lines[1].len(), 500);
    }

    #[test]
    fn newline_is_appended_once() {
        let mock = MockTransport::new();
        let mut session = session(&mock, 0);

        session.send_command("IDR", TIMEOUT).unwrap();
        session.send_command("r01\n", TIMEOUT).unwrap();
        assert_eq!(mock.written_commands(), vec!["IDR\n", "r01\n"]);
        assert_eq!(session.last_command(), "r01");
    }

    #[traced_test]
    #[test]
    fn unexpected_stale_input_is_logged_and_discarded() {
        let mock = MockTransport::new().with_stale_input(b"OK00,9,9,9\n\r>");
        mock.queue_reply(b"OK00\n\r>");
        let mut session = session(&mock, 2);

        let reply = session.send_command("UZC", TIMEOUT).unwrap();
        assert_eq!(reply.as_line(), Some("OK00"));
        assert!(logs_contain("Discarding unread reply"));
    }

    #[traced_test]
    #[test]
    fn leftover_prompt_is_discarded_quietly() {
        let mock = MockTransport::new().with_stale_input(b">\n\r");
        mock.queue_reply(b"OK00\n\r>");
        let mut session = session(&mock, 2);

        session.send_command("UZC", TIMEOUT).unwrap();
        assert!(!logs_contain("Discarding unread reply"));
    }

    #[test]
    fn write_failure_closes_session() {
        let mock = MockTransport::new();
        mock.trigger_write_failure();
        let mut session = session(&mock, 2);

        assert!(matches!(
            session.send_command("IDR", TIMEOUT),
            Err(CrsError::Io(_))
        ));
        assert!(!session.is_open());
        assert!(matches!(
            session.send_command("IDR", TIMEOUT),
            Err(CrsError::NotConnected)
        ));
        assert!(mock.written().is_empty());
    }

    #[test]
    fn query_maps_empty_reply_to_timeout() {
        let mock = MockTransport::new();
        let mut session = session(&mock, 1);

        match session.query("MES", TIMEOUT) {
            Err(CrsError::Timeout { command }) => assert_eq!(command, "MES"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn closed_session_refuses_commands() {
        let mock = MockTransport::new();
        let mut session = session(&mock, 1);
        session.close();

        assert!(matches!(
            session.send_command("IDR", TIMEOUT),
            Err(CrsError::NotConnected)
        ));
        assert!(mock.written().is_empty());
    }
}
