//! Error types for Rollcall Core

use thiserror::Error;

/// Broad classes of fault, used by transport layers to pick a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-input fault. Never retried; 4xx-equivalent.
    Validation,
    /// A referenced entity does not exist. Not-found-equivalent.
    NotFound,
    /// A draw could not be fulfilled with the given parameters.
    /// Recoverable by retrying with different parameters.
    Exhausted,
}

/// Named fault conditions surfaced verbatim to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NameRequired,
    IdRequired,
    IdExists,
    NameExists,
    CooldownInvalid,
    ClassNameRequired,
    ClassOrderInvalid,
    BatchCountInvalid,
    BatchCountExceedsAvailable,
    HistoryNoteTooLong,
    HistoryInvalid,
    UnsupportedAction,
    StudentMissing,
    ClassMissing,
    HistoryMissing,
    ClassLast,
    NoStudentsAvailable,
    NoGroupsAvailable,
    UnsupportedRandomMode,
}

impl ErrorCode {
    /// Wire name of the condition, stable across versions.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NameRequired => "name_required",
            ErrorCode::IdRequired => "id_required",
            ErrorCode::IdExists => "id_exists",
            ErrorCode::NameExists => "name_exists",
            ErrorCode::CooldownInvalid => "cooldown_invalid",
            ErrorCode::ClassNameRequired => "class_name_required",
            ErrorCode::ClassOrderInvalid => "class_order_invalid",
            ErrorCode::BatchCountInvalid => "batch_count_invalid",
            ErrorCode::BatchCountExceedsAvailable => "batch_count_exceeds_available",
            ErrorCode::HistoryNoteTooLong => "history_note_too_long",
            ErrorCode::HistoryInvalid => "history_invalid",
            ErrorCode::UnsupportedAction => "unsupported_action",
            ErrorCode::StudentMissing => "student_missing",
            ErrorCode::ClassMissing => "class_missing",
            ErrorCode::HistoryMissing => "history_missing",
            ErrorCode::ClassLast => "class_last",
            ErrorCode::NoStudentsAvailable => "no_students_available",
            ErrorCode::NoGroupsAvailable => "no_groups_available",
            ErrorCode::UnsupportedRandomMode => "unsupported_random_mode",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrorCode::NameRequired
            | ErrorCode::IdRequired
            | ErrorCode::IdExists
            | ErrorCode::NameExists
            | ErrorCode::CooldownInvalid
            | ErrorCode::ClassNameRequired
            | ErrorCode::ClassOrderInvalid
            | ErrorCode::BatchCountInvalid
            | ErrorCode::BatchCountExceedsAvailable
            | ErrorCode::HistoryNoteTooLong
            | ErrorCode::HistoryInvalid
            | ErrorCode::UnsupportedAction => ErrorKind::Validation,
            ErrorCode::StudentMissing
            | ErrorCode::ClassMissing
            | ErrorCode::HistoryMissing
            | ErrorCode::ClassLast => ErrorKind::NotFound,
            ErrorCode::NoStudentsAvailable
            | ErrorCode::NoGroupsAvailable
            | ErrorCode::UnsupportedRandomMode => ErrorKind::Exhausted,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Fault(ErrorCode),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Error::Fault(code)
    }
}

impl Error {
    /// The named condition, if this is a fault rather than an I/O or
    /// serialization failure.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Fault(code) => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
