use thiserror::Error;

/// The complete wire-visible error taxonomy. Every value carries a short
/// ASCII token used verbatim in `-ERR <TOKEN>\r\n` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed CRLF framing")]
    BadFraming,
    #[error("non-decimal or overflowing numeric header")]
    BadInteger,
    #[error("bulk length or array count exceeds the configured maximum")]
    TooLarge,
    #[error("command is not an array of bulk strings")]
    BadShape,
    #[error("wrong number of arguments for the verb")]
    BadArity,
    #[error("verb not recognized")]
    UnknownCommand,
    #[error("key length is zero or exceeds 2^30 - 1")]
    InvalidKey,
    #[error("allocation failed")]
    OutOfMemory,
    #[error("internal post-condition failure")]
    Internal,
}

impl ProtocolError {
    /// The short ASCII token this error renders as in an `-ERR` reply.
    pub const fn wire_token(self) -> &'static str {
        match self {
            Self::BadFraming => "FRAMING",
            Self::BadInteger => "NUMBER",
            Self::TooLarge => "MSGSIZE",
            Self::BadShape => "SHAPE",
            Self::BadArity => "ARITY",
            Self::UnknownCommand => "UNKNOWN",
            Self::InvalidKey => "KEYLEN",
            Self::OutOfMemory => "NOMEM",
            Self::Internal => "INTERNAL",
        }
    }

    /// `Internal` is the only error that ends the session; every other kind
    /// is reported to the client and the connection stays open.
    pub const fn closes_connection(self) -> bool {
        matches!(self, Self::Internal)
    }
}
