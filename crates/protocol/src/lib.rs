//! Wire protocol for the key/value server: a zero-copy frame lexer, a
//! command aggregator, the fixed error taxonomy, and a reply encoder.
//!
//! ```text
//! bytes ──► Lexer ──► Aggregator ──► Command ──► (dispatch elsewhere)
//!                                                       │
//!                                                       ▼
//!                                                    Reply ──► bytes
//! ```
//!
//! Nothing in this crate owns a connection, a socket, or the index — it
//! only turns bytes into `Command`s and `Reply`s into bytes.

mod aggregator;
mod error;
mod frame;
mod reply;

pub use aggregator::{AggOutcome, Aggregator, Command, MAX_COMMAND_ARITY};
pub use error::ProtocolError;
pub use frame::{Frame, FrameKind, LexOutcome, Lexer, Limits};
pub use reply::Reply;
