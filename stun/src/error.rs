use thiserror::Error;

#[derive(Debug, Error)]
pub enum StunError {
    /// Truncated header, non-multiple-of-four length, a TLV extending
    /// past the payload, or a missing magic cookie. Fatal for the
    /// current message.
    #[error("message format error")]
    Format,
    #[error("unknown method: 0x{0:04x}")]
    UnknownMethod(u16),
    /// The message carried comprehension-required attribute types the
    /// decoder does not understand. The offending types travel with the
    /// error so an error response can echo them.
    #[error("unknown comprehension-required attributes: {0:?}")]
    UnknownAttributes(Vec<u16>),
    /// Authentication was required but the message has no
    /// MESSAGE-INTEGRITY, or no key could be derived for it.
    #[error("unauthorized")]
    Unauthorized,
    #[error("MESSAGE-INTEGRITY not found")]
    NotFoundIntegrity,
    #[error("integrity check failure")]
    IntegrityCheckFailure,
    #[error("incorrect fingerprint")]
    IncorrectFingerprint,
    #[error("hmac digest failed")]
    DigestFailed,
    /// The transaction deadline elapsed without a response.
    #[error("transaction timeout")]
    Timeout,
    /// The transport closed while the transaction was pending.
    #[error("transaction cancelled")]
    Cancelled,
    /// The peer answered with an error response; the numeric code and
    /// reason phrase are surfaced verbatim.
    #[error("error response {code}: {reason}")]
    ErrorResponse { code: u16, reason: String },
    #[error("unsupported uri: {0}")]
    UnsupportedUri(String),
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),
    #[error("Utf8Error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Mux(#[from] mux::Error),
}
