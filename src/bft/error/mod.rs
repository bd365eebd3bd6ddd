//! Error related business logic of `synod`.
//!
//! Contains the `ErrorKind` enum and other useful extensions of the
//! `std::result::Result` type, to work with our very own `Error` type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// Extension of the standard library's `Result` type,
/// used to wrap its error in a `synod::error::Error`.
pub trait ResultWrappedExt {
    type T;

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
    fn wrapped(self, kind: ErrorKind) -> Result<Self::T>;
}

/// Extension of the standard library's `Result` type.
///
/// Different from `ResultWrappedExt`, this trait is
/// used in cases where we want to drop the underlying
/// error type in the `Result`. Having this possibility
/// might be useful when the error type in the `Result`
/// doesn't implement `Send`.
pub trait ResultSimpleExt {
    type T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T>;
    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
}

impl<T, E> ResultWrappedExt for result::Result<T, E>
where
    E: Into<Box<dyn error::Error + Send + Sync>>,
{
    type T = T;

    fn wrapped(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, e))
    }

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, format!("{}: {}", msg, e.into())))
    }
}

impl<T, E> ResultSimpleExt for result::Result<T, E> {
    type T = T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|_| Error::simple(kind))
    }

    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|_| Error::wrapped(kind, msg.to_owned()))
    }
}

/// Wrapper result type for `std::result::Result`.
pub type Result<T> = result::Result<T, Error>;

/// The error type used throughout this crate.
pub struct Error {
    inner: ErrorInner,
}

#[derive(Debug)]
enum ErrorInner {
    Simple(ErrorKind),
    Wrapped(ErrorKind, Box<dyn error::Error + Send + Sync>),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl Error {
    /// Returns an error not wrapping another
    /// error implementation, with kind `ErrorKind`.
    pub fn simple(kind: ErrorKind) -> Self {
        let inner = ErrorInner::Simple(kind);
        Error { inner }
    }

    /// Wraps an arbitrary error in an `Error`,
    /// with kind of type `ErrorKind`.
    pub fn wrapped<E>(kind: ErrorKind, e: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        let inner = ErrorInner::Wrapped(kind, e.into());
        Error { inner }
    }

    /// Returns a copy of the `ErrorKind` of this `Error`.
    pub fn kind(&self) -> ErrorKind {
        match &self.inner {
            ErrorInner::Simple(k) => *k,
            ErrorInner::Wrapped(k, _) => *k,
        }
    }

    /// Swaps the `ErrorKind` of this `Error`.
    pub fn swap_kind(self, k: ErrorKind) -> Self {
        let inner = match self.inner {
            ErrorInner::Simple(_) => ErrorInner::Simple(k),
            ErrorInner::Wrapped(_, e) => ErrorInner::Wrapped(k, e),
        };
        Error { inner }
    }

    /// Whether this error corresponds to an internal invariant
    /// violation (spec §7 `InvariantViolation`), which is fatal and
    /// should terminate the replica process with exit code 3.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvariantViolation)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Simple(k) => write!(fmt, "{:?}", k),
            ErrorInner::Wrapped(k, e) => write!(fmt, "{:?}: {}", k, e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::wrapped(ErrorKind::Communication, e)
    }
}

impl error::Error for Error {}

/// Tags describing where, or under what circumstances, an `Error`
/// originated.
///
/// Most variants name a module; the tail variants name the error
/// taxonomy of spec §7 directly, for errors that are protocol-level
/// rather than module-level in nature.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// Generic I/O / communication failure.
    Communication,
    /// Malformed wire message (header or payload).
    CommunicationMessage,
    /// `bft::log` failure.
    Log,
    /// `bft::executable` failure.
    Executable,
    /// `bft::consensus` failure.
    Consensus,
    /// `bft::core` (replica bootstrap / main loop) failure.
    Core,
    /// `bft::crypto::hash` failure.
    CryptoHash,
    /// `bft::crypto::signature` failure.
    CryptoSignature,
    /// `bft::config` validation failure (spec §6 exit code 1).
    Config,
    /// `bft::observer` failure.
    Observer,

    /// Peer unreachable; transport-level, tolerated by quorum.
    TransportTransient,
    /// Authenticator did not match the claimed sender.
    AuthFailure,
    /// Primary sent two different digests for the same `(view, seq)`.
    Equivocation,
    /// Message carries a view strictly less than ours.
    StaleView,
    /// Message carries a view strictly greater than ours.
    FutureView,
    /// Identical message already logged; idempotent no-op.
    DuplicateMessage,
    /// Internal invariant broken; fatal, process exits with code 3.
    InvariantViolation,
    /// Client resubmitted a request we already executed and cached.
    ClientResubmission,
}
