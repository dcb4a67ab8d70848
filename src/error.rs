//! Error types and the status-code catalog for unqdb.
//!
//! Every [`Error`] maps onto an [`ErrorCode`], the small integer status codes
//! used by the engine family, and every code has a fixed human-readable
//! message (see [`ErrorCode::message`]).

use std::fmt;
use std::io;

/// The result type used throughout unqdb.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for unqdb operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The backing file could not be opened or created.
    #[error("Unable to open the database file: {0}")]
    CannotOpen(String),

    /// Data corruption was detected.
    #[error("Data corruption: {0}")]
    Corrupt(String),

    /// A checksum mismatch was detected.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The expected checksum value.
        expected: u32,
        /// The actual checksum value.
        actual: u32,
    },

    /// The requested key was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A cursor moved past either end of the index.
    #[error("End of input")]
    Eof,

    /// The database or record already exists.
    #[error("Already exists: {0}")]
    Exists(String),

    /// An invalid argument was provided.
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// The handle is in a state that does not allow the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The database was opened read-only.
    #[error("Read only key/value storage engine")]
    ReadOnly,

    /// The backing file cannot grow any further.
    #[error("Full database: {0}")]
    Full(String),

    /// A hard engine limit (key length, page size) was exceeded.
    #[error("Database limit reached: {0}")]
    LimitReached(String),

    /// Transaction protocol violation.
    #[error("Locking protocol error: {0}")]
    LockError(String),

    /// The backing file is locked by another handle.
    #[error("The database file is locked: {0}")]
    Busy(String),

    /// The operation is forbidden in the current library state.
    #[error("Forbidden operation: {0}")]
    Locked(String),

    /// The operation was aborted before completion.
    #[error("Operation aborted: {0}")]
    Aborted(String),

    /// A feature is not implemented by the selected engine.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// A script failed to compile.
    #[error("Compilation error{}: {message}", line_suffix(.line))]
    Compile {
        /// Diagnostic produced by the compiler.
        message: String,
        /// Source line of the diagnostic, when known.
        line: Option<u32>,
    },

    /// A script raised a runtime fault.
    #[error("Virtual machine error: {0}")]
    Vm(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn line_suffix(line: &Option<u32>) -> String {
    match line {
        Some(line) => format!(" at line {}", line),
        None => String::new(),
    }
}

impl Error {
    /// Creates a new corruption error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corrupt(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParam(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new transaction protocol error.
    pub fn lock_error(msg: impl Into<String>) -> Self {
        Error::LockError(msg.into())
    }

    /// Returns true for the expected "no such record" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Returns true when a cursor ran off the end of the index.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Eof)
    }

    /// Maps this error onto its catalog status code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Io(e) => match e.kind() {
                io::ErrorKind::PermissionDenied => ErrorCode::Permission,
                io::ErrorKind::OutOfMemory => ErrorCode::OutOfMemory,
                io::ErrorKind::UnexpectedEof => ErrorCode::EndOfInput,
                _ => ErrorCode::IoError,
            },
            Error::CannotOpen(_) => ErrorCode::CannotOpen,
            Error::Corrupt(_) | Error::ChecksumMismatch { .. } => ErrorCode::Corrupt,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Eof => ErrorCode::EndOfInput,
            Error::Exists(_) => ErrorCode::Exists,
            Error::InvalidParam(_) | Error::InvalidState(_) => ErrorCode::InvalidParam,
            Error::ReadOnly => ErrorCode::ReadOnly,
            Error::Full(_) => ErrorCode::Full,
            Error::LimitReached(_) => ErrorCode::LimitReached,
            Error::LockError(_) => ErrorCode::LockError,
            Error::Busy(_) => ErrorCode::Busy,
            Error::Locked(_) => ErrorCode::Locked,
            Error::Aborted(_) => ErrorCode::Aborted,
            Error::NotImplemented(_) => ErrorCode::NotImplemented,
            Error::Compile { .. } => ErrorCode::CompileError,
            Error::Vm(_) => ErrorCode::VmError,
            Error::Serialization(_) => ErrorCode::Corrupt,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidParam(format!("malformed configuration: {}", err))
    }
}

/// Status codes of the engine family.
///
/// Native codes are zero or negative. `Ok` and `Done` are not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Successful result.
    Ok = 0,
    /// Out of memory.
    OutOfMemory = -1,
    /// IO error.
    IoError = -2,
    /// Empty record.
    Empty = -3,
    /// Forbidden operation.
    Locked = -4,
    /// No such record.
    NotFound = -6,
    /// Database limit reached.
    LimitReached = -7,
    /// Invalid parameter.
    InvalidParam = -9,
    /// Another thread released this instance.
    Aborted = -10,
    /// Record exists.
    Exists = -11,
    /// Unknown configuration option.
    UnknownConfig = -13,
    /// The database file is locked.
    Busy = -14,
    /// Method not implemented by the underlying engine.
    NotImplemented = -17,
    /// End of input.
    EndOfInput = -18,
    /// Permission error.
    Permission = -19,
    /// No such method.
    NoOp = -20,
    /// Corrupt pointer.
    Corrupt = -24,
    /// Operation done.
    Done = -28,
    /// Compilation error.
    CompileError = -70,
    /// Virtual machine error.
    VmError = -71,
    /// Full database.
    Full = -73,
    /// Unable to open the database file.
    CannotOpen = -74,
    /// Read only key/value storage engine.
    ReadOnly = -75,
    /// Locking protocol error.
    LockError = -76,
}

const ALL_CODES: [ErrorCode; 24] = [
    ErrorCode::Ok,
    ErrorCode::OutOfMemory,
    ErrorCode::IoError,
    ErrorCode::Empty,
    ErrorCode::Locked,
    ErrorCode::NotFound,
    ErrorCode::LimitReached,
    ErrorCode::InvalidParam,
    ErrorCode::Aborted,
    ErrorCode::Exists,
    ErrorCode::UnknownConfig,
    ErrorCode::Busy,
    ErrorCode::NotImplemented,
    ErrorCode::EndOfInput,
    ErrorCode::Permission,
    ErrorCode::NoOp,
    ErrorCode::Corrupt,
    ErrorCode::Done,
    ErrorCode::CompileError,
    ErrorCode::VmError,
    ErrorCode::Full,
    ErrorCode::CannotOpen,
    ErrorCode::ReadOnly,
    ErrorCode::LockError,
];

impl ErrorCode {
    /// Returns the numeric status code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Looks up a code by its numeric value.
    pub fn from_code(code: i32) -> Option<Self> {
        ALL_CODES.iter().copied().find(|c| c.as_i32() == code)
    }

    /// Returns true for codes that do not signal a failure.
    pub fn is_success(self) -> bool {
        matches!(self, ErrorCode::Ok | ErrorCode::Done)
    }

    /// The fixed message for this code.
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::Ok => "OK",
            ErrorCode::OutOfMemory => "Out of memory",
            ErrorCode::IoError => "IO error",
            ErrorCode::Empty => "Empty record",
            ErrorCode::Locked => "Forbidden Operation",
            ErrorCode::NotFound => "No such record",
            ErrorCode::LimitReached => "Database limit reached",
            ErrorCode::InvalidParam => "Invalid parameter",
            ErrorCode::Aborted => "Another thread have released this instance",
            ErrorCode::Exists => "Record exists",
            ErrorCode::UnknownConfig => "Unknown configuration option",
            ErrorCode::Busy => "The database file is locked",
            ErrorCode::NotImplemented => {
                "Method not implemented by the underlying Key/Value storage engine"
            }
            ErrorCode::EndOfInput => "End Of Input",
            ErrorCode::Permission => "Permission error",
            ErrorCode::NoOp => "No such method",
            ErrorCode::Corrupt => "Corrupt pointer",
            ErrorCode::Done => "Operation done",
            ErrorCode::CompileError => "Compilation error",
            ErrorCode::VmError => "Virtual machine error",
            ErrorCode::Full => "Full database",
            ErrorCode::CannotOpen => "Unable to open the database file",
            ErrorCode::ReadOnly => "Read only Key/Value storage engine",
            ErrorCode::LockError => "Locking protocol error",
        }
    }
}

/// Message for a raw status code; unknown codes render as `err: <n>`.
pub fn message_for(code: i32) -> String {
    match ErrorCode::from_code(code) {
        Some(c) => c.message().to_string(),
        None => format!("err: {}", code),
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corrupt("bad header");
        assert_eq!(err.to_string(), "Data corruption: bad header");

        let err = Error::ChecksumMismatch { expected: 0x12345678, actual: 0x87654321 };
        assert!(err.to_string().contains("0x12345678"));
        assert!(err.to_string().contains("0x87654321"));

        let err = Error::Compile { message: "unexpected symbol".into(), line: Some(3) };
        assert_eq!(err.to_string(), "Compilation error at line 3: unexpected symbol");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.code(), ErrorCode::IoError);

        let denied: Error = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert_eq!(denied.code(), ErrorCode::Permission);
    }

    #[test]
    fn test_code_mapping() {
        assert_eq!(Error::not_found("k").code(), ErrorCode::NotFound);
        assert_eq!(Error::ReadOnly.code(), ErrorCode::ReadOnly);
        assert_eq!(Error::lock_error("x").code(), ErrorCode::LockError);
        assert_eq!(Error::Vm("boom".into()).code(), ErrorCode::VmError);
        assert!(Error::Eof.is_eof());
        assert!(Error::not_found("k").is_not_found());
    }

    #[test]
    fn test_catalog_round_trip() {
        for code in ALL_CODES {
            assert_eq!(ErrorCode::from_code(code.as_i32()), Some(code));
            assert!(!code.message().is_empty());
        }
        assert_eq!(ErrorCode::from_code(12345), None);
        assert_eq!(message_for(-6), "No such record");
        assert_eq!(message_for(99), "err: 99");
        assert!(ErrorCode::Done.is_success());
        assert!(!ErrorCode::Busy.is_success());
    }
}
