//! The reply encoder (§4.6): formats outcomes into the wire's reply table.
//!
//! Encoding never allocates on its own account — it only appends into a
//! buffer the caller already owns. Whatever that buffer does to grow itself
//! (a `Vec` reallocating, an I/O collaborator flushing and reusing it) is
//! none of this module's concern.

use crate::error::ProtocolError;

/// One of the fixed set of replies the server can send.
#[derive(Debug, Clone, Copy)]
pub enum Reply<'a> {
    /// `SET`/`DEL`/`EXPIRE` success.
    Ok,
    /// `GET` hit — the stored value bytes.
    Value(&'a [u8]),
    /// `GET` miss.
    Miss,
    /// Any protocol or dispatch failure.
    Error(ProtocolError),
}

impl<'a> Reply<'a> {
    /// Appends the wire encoding of this reply to `out`.
    pub fn encode(self, out: &mut Vec<u8>) {
        match self {
            Reply::Ok => out.extend_from_slice(b"+OK\r\n"),
            Reply::Value(bytes) => {
                out.extend_from_slice(bytes);
                out.extend_from_slice(b"\r\n");
            }
            Reply::Miss => out.extend_from_slice(b"$-1\r\n"),
            Reply::Error(err) => {
                out.extend_from_slice(b"-ERR ");
                out.extend_from_slice(err.wire_token().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
        }
    }
}
