//! Per-connection state: a read buffer with a consumed cursor, a write
//! buffer with a drain cursor, and the aggregator that carries parse state
//! across partial reads — the connection's own slot for the parser's
//! resumable position, independent of the socket.
//!
//! Everything here is synchronous, bounded, allocation-free in the steady
//! state (the two `Vec<u8>`s only grow, never per-command), and owns no
//! socket — [`crate::server`] is the only thing that talks to a
//! [`tokio::net::TcpStream`].

use std::net::SocketAddr;

use protocol::{AggOutcome, Aggregator, Limits, Reply};
use store::Table;

use crate::dispatch::{self, Directive};

/// One accepted TCP connection's framing and buffering state.
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    read_buf: Vec<u8>,
    read_pos: usize,
    write_buf: Vec<u8>,
    write_pos: usize,
    aggregator: Aggregator,
}

impl Connection {
    pub fn new(id: u64, peer: SocketAddr) -> Self {
        Connection {
            id,
            peer,
            read_buf: Vec::new(),
            read_pos: 0,
            write_buf: Vec::new(),
            write_pos: 0,
            aggregator: Aggregator::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Appends freshly read bytes to the unconsumed tail of the read
    /// buffer. The caller is responsible for enforcing the configured read
    /// buffer hard max before calling this.
    pub fn feed(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);
    }

    /// Bytes currently sitting in the read buffer, consumed or not —
    /// what the caller checks against the configured hard max.
    pub fn read_buffer_len(&self) -> usize {
        self.read_buf.len()
    }

    /// Drains every complete command currently buffered, dispatching each
    /// into `table` and appending its reply to the write buffer. Returns
    /// `true` if an `Internal` error was hit and the connection must now be
    /// closed.
    pub fn process(&mut self, table: &mut Table, limits: &Limits, now: u32) -> bool {
        loop {
            let tail = &self.read_buf[self.read_pos..];
            if tail.is_empty() {
                break;
            }
            match self.aggregator.next_command(tail, limits) {
                AggOutcome::NeedMore => break,
                AggOutcome::Command { command, consumed } => {
                    self.read_pos += consumed;
                    let directive = dispatch::dispatch(table, limits, now, command, &mut self.write_buf);
                    if directive == Directive::Close {
                        self.compact_read_buffer();
                        return true;
                    }
                }
                AggOutcome::Error { kind, consumed } => {
                    self.read_pos += consumed;
                    logging::on_protocol_error(self.id, kind.wire_token());
                    Reply::Error(kind).encode(&mut self.write_buf);
                    if kind.closes_connection() {
                        self.compact_read_buffer();
                        return true;
                    }
                }
            }
        }
        self.compact_read_buffer();
        false
    }

    /// Drops bytes already consumed from the front of the read buffer so it
    /// doesn't grow without bound across many small commands. Cheap relative
    /// to a command's own cost since it only runs once per `process` call.
    fn compact_read_buffer(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        self.read_buf.drain(0..self.read_pos);
        self.read_pos = 0;
    }

    /// The unconsumed tail of the write buffer the caller should try to
    /// write to the socket next.
    pub fn pending_write(&self) -> &[u8] {
        &self.write_buf[self.write_pos..]
    }

    pub fn has_pending_write(&self) -> bool {
        self.write_pos < self.write_buf.len()
    }

    /// Records that `n` bytes of the pending write were actually written,
    /// reclaiming the buffer once it's fully drained.
    pub fn advance_write(&mut self, n: usize) {
        self.write_pos += n;
        if self.write_pos == self.write_buf.len() {
            self.write_buf.clear();
            self.write_pos = 0;
        }
    }
}
