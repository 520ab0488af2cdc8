use std::time::Duration;
use std::{error, fmt, io};

/// A fault on one engine's GTP channel. All of these are potentially
/// transient; the game and match layers convert them into a bounded
/// restart attempt.
#[derive(Debug)]
pub enum GtpError {
    /// No complete response arrived before the deadline.
    Timeout(Duration),
    /// The engine's output stream closed and no buffered responses remain.
    Shutdown,
    /// `? illegal move` response.
    IllegalMove,
    /// `? cannot score` response.
    CannotScore,
    /// `? unknown command` response.
    UnknownCommand,
    /// Any other `?`-prefixed failure response.
    ResponseError(String),
    /// The engine process could not be spawned or its pipe written to.
    Process(io::Error),
}

impl fmt::Display for GtpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            GtpError::Timeout(t) => write!(f, "no response within {:.1}s", t.as_secs_f64()),
            GtpError::Shutdown => write!(f, "engine stream closed"),
            GtpError::IllegalMove => write!(f, "engine rejected the move as illegal"),
            GtpError::CannotScore => write!(f, "engine cannot score the position"),
            GtpError::UnknownCommand => write!(f, "engine does not know the command"),
            GtpError::ResponseError(ref msg) => write!(f, "GTP failure response: {msg}"),
            GtpError::Process(ref e) => write!(f, "process error: {e}"),
        }
    }
}

impl error::Error for GtpError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            GtpError::Process(ref e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum Error {
    /// Transport fault attributed to a named engine.
    Gtp { engine: String, source: GtpError },
    /// Bad configuration; aborts the affected match before any engine starts.
    Config(String),
    /// An engine broke its protocol contract (missing required commands,
    /// malformed moves, exhausted restart credit); the engine is blacklisted
    /// for the remainder of the run and the current match aborts.
    Permanent { engine: String, reason: String },
    /// The supervisor cannot confirm process death; the whole run aborts.
    Fatal(String),
    Io(io::Error),
}

impl Error {
    pub fn gtp(engine: &str, source: GtpError) -> Error {
        Error::Gtp {
            engine: engine.to_string(),
            source,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(*self, Error::Fatal(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Gtp {
                ref engine,
                ref source,
            } => write!(f, "[{engine}] {source}"),
            Error::Config(ref msg) => write!(f, "config error: {msg}"),
            Error::Permanent {
                ref engine,
                ref reason,
            } => write!(f, "[{engine}] permanent fault: {reason}"),
            Error::Fatal(ref msg) => write!(f, "fatal: {msg}"),
            Error::Io(ref e) => write!(f, "{e}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Gtp { ref source, .. } => Some(source),
            Error::Io(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}
