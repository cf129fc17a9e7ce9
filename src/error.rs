use std::fmt::{Display, Formatter};
use std::io;

/// Errors raised by control operations and frame handling.
///
/// Stream-level failures never surface here; they are converted to
/// END/ABORT/RESET frames on the wire per the error policy.
#[derive(Debug)]
pub enum Error {
    /// Socket or reactor I/O failed.
    Io(io::Error),
    /// No route under `reference` admits streams from `source`.
    UnknownRoute {
        /// Name of the requesting source.
        source: String,
        /// Reference the lookup ran against.
        reference: u64,
    },
    /// A connect-side route carries the wildcard where a concrete address is
    /// required.
    AddressRequired,
    /// A frame violated the wire layout.
    Codec(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::UnknownRoute { source, reference } => {
                write!(f, "no route {} for source {}", reference, source)
            }
            Error::AddressRequired => write!(f, "client route requires a concrete address"),
            Error::Codec(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
