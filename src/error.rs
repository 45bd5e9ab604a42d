use std::string::FromUtf8Error;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- transport errors ------------------------------------------
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("no debug client is connected")]
    NotConnected,
    #[error("handshake failed: {0}")]
    Handshake(&'static str),

    // --------------------------------- request validation errors ---------------------------------
    #[error("unknown packet type {0}")]
    UnknownPacket(u32),
    #[error("truncated request payload")]
    TruncatedRequest,
    #[error("malformed string in request: {0}")]
    Utf8(#[from] FromUtf8Error),

    // --------------------------------- session errors --------------------------------------------
    #[error("statement scope imbalance detected")]
    ScopeImbalance,
}

impl Error {
    /// Return a hint to the caller - respond with an error packet and keep the
    /// session alive, or mark the whole debug session as failed.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::UnknownPacket(_) => false,
            Error::TruncatedRequest => false,
            Error::Utf8(_) => false,

            Error::Io(_) => true,
            Error::NotConnected => true,
            Error::Handshake(_) => true,
            Error::ScopeImbalance => true,
        }
    }
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!(target: "hldp", "{e:#}");
                None
            }
        }
    };
    ($res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!(target: "hldp", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}
