//! The command aggregator (§4.2): groups a run of frames into one
//! `Command`.
//!
//! [`Aggregator::next_command`] is cheap to construct and is meant to be
//! discarded and re-invoked by the caller whenever it reports
//! [`AggOutcome::NeedMore`] — it never holds a borrowed slice across a call
//! boundary, only within the single call it's given. Re-driving a fresh
//! lexer from the command's start on every new batch of bytes costs nothing
//! extra: the bulk payload itself is never CRLF-scanned (its presence is a
//! length check), so all that's ever redone is parsing a handful of header
//! bytes.

use crate::error::ProtocolError;
use crate::frame::{FrameKind, LexOutcome, Lexer, Limits};

/// Hard ceiling on command arity, independent of the runtime-configured
/// `array_size_max` (which must be validated at startup to not exceed
/// this). Bounds the aggregator's fixed-size element array so it never
/// allocates.
pub const MAX_COMMAND_ARITY: usize = 64;

/// A completed command: a verb plus its ordered bulk-string arguments, all
/// still borrowed from the connection's read buffer.
#[derive(Debug, Clone, Copy)]
pub struct Command<'a> {
    elements: [&'a [u8]; MAX_COMMAND_ARITY],
    count: usize,
}

impl<'a> Command<'a> {
    /// The command verb — the array's first bulk-string element.
    pub fn verb(&self) -> &'a [u8] {
        self.elements[0]
    }

    /// The elements after the verb.
    pub fn args(&self) -> &[&'a [u8]] {
        &self.elements[1..self.count]
    }

    /// Total element count, including the verb.
    pub fn arity(&self) -> usize {
        self.count
    }
}

/// Outcome of [`Aggregator::next_command`].
pub enum AggOutcome<'a> {
    Command { command: Command<'a>, consumed: usize },
    NeedMore,
    Error { kind: ProtocolError, consumed: usize },
}

/// Drives a frame lexer over a buffer until one full command is assembled.
#[derive(Default)]
pub struct Aggregator;

impl Aggregator {
    pub fn new() -> Self {
        Aggregator
    }

    /// Parses one command out of `buf`, the full unconsumed tail of a
    /// connection's read buffer. Stand-alone non-array frames at the top
    /// level are skipped; once an array header arrives, every subsequent
    /// element must be a bulk string or the command is rejected as
    /// malformed.
    pub fn next_command<'a>(&self, buf: &'a [u8], limits: &Limits) -> AggOutcome<'a> {
        let mut lexer = Lexer::new();
        let mut cursor = 0usize;

        let expected = loop {
            match lexer.lex_next(&buf[cursor..], limits) {
                LexOutcome::NeedMore => return AggOutcome::NeedMore,
                LexOutcome::Error { kind, consumed } => {
                    return AggOutcome::Error { kind, consumed: cursor + consumed };
                }
                LexOutcome::Frame { frame, consumed } => {
                    cursor += consumed;
                    if frame.kind == FrameKind::Array {
                        let count = frame.array_count.unwrap_or(0) as usize;
                        if count == 0 || count > MAX_COMMAND_ARITY {
                            return AggOutcome::Error { kind: ProtocolError::BadShape, consumed: cursor };
                        }
                        break count;
                    }
                    // Top-level stand-alone frame outside any array: ignore.
                }
            }
        };

        let mut elements = [&[][..]; MAX_COMMAND_ARITY];
        let mut arrived = 0usize;
        while arrived < expected {
            match lexer.lex_next(&buf[cursor..], limits) {
                LexOutcome::NeedMore => return AggOutcome::NeedMore,
                LexOutcome::Error { kind, consumed } => {
                    return AggOutcome::Error { kind, consumed: cursor + consumed };
                }
                LexOutcome::Frame { frame, consumed } => {
                    cursor += consumed;
                    if frame.kind != FrameKind::Bulk {
                        return AggOutcome::Error { kind: ProtocolError::BadShape, consumed: cursor };
                    }
                    elements[arrived] = frame.data;
                    arrived += 1;
                }
            }
        }

        AggOutcome::Command { command: Command { elements, count: arrived }, consumed: cursor }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits { value_size_max: 1024, array_size_max: 50 }
    }

    #[test]
    fn basic_set_command() {
        let agg = Aggregator::new();
        let input = b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nhello\r\n";
        match agg.next_command(input, &limits()) {
            AggOutcome::Command { command, consumed } => {
                assert_eq!(command.verb(), b"SET");
                assert_eq!(command.args(), &[&b"key"[..], &b"hello"[..]]);
                assert_eq!(consumed, input.len());
            }
            _ => panic!("expected a complete command"),
        }
    }

    #[test]
    fn incomplete_command_reports_need_more() {
        let agg = Aggregator::new();
        let input = b"*2\r\n$3\r\nGET\r\n$3\r\nke";
        assert!(matches!(agg.next_command(input, &limits()), AggOutcome::NeedMore));
    }

    #[test]
    fn nested_array_is_bad_shape() {
        let agg = Aggregator::new();
        let input = b"*1\r\n*1\r\n$1\r\na\r\n";
        match agg.next_command(input, &limits()) {
            AggOutcome::Error { kind, .. } => assert_eq!(kind, ProtocolError::BadShape),
            _ => panic!("expected BadShape"),
        }
    }

    #[test]
    fn stray_top_level_frame_is_ignored() {
        let agg = Aggregator::new();
        let input = b"+PING\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n";
        match agg.next_command(input, &limits()) {
            AggOutcome::Command { command, .. } => {
                assert_eq!(command.verb(), b"GET");
                assert_eq!(command.args(), &[&b"k"[..]]);
            }
            _ => panic!("expected the GET command past the stray simple string"),
        }
    }

    #[test]
    fn zero_arity_array_is_rejected() {
        let agg = Aggregator::new();
        match agg.next_command(b"*0\r\n", &limits()) {
            AggOutcome::Error { kind, .. } => assert_eq!(kind, ProtocolError::BadShape),
            _ => panic!("expected BadShape for an empty array"),
        }
    }
}
