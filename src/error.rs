//! Error types for the runtime core

use thiserror::Error;

/// Integer status codes carried across the native extension boundary.
///
/// `Ok` is zero, every failure is negative. The numbering is part of the
/// extension ABI and must never be reordered.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok = 0,
    Unsupported = -1,
    CannotCopy = -2,
    Locked = -3,
    MarkFailed = -4,
    OutOfMemory = -5,
    DeadReference = -6,
    UnknownType = -7,
    DuplicateType = -8,
    Borrowed = -9,
    InvalidArgument = -10,
    InvalidConfig = -11,
    Callback = -12,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Status> {
        let status = match code {
            0 => Status::Ok,
            -1 => Status::Unsupported,
            -2 => Status::CannotCopy,
            -3 => Status::Locked,
            -4 => Status::MarkFailed,
            -5 => Status::OutOfMemory,
            -6 => Status::DeadReference,
            -7 => Status::UnknownType,
            -8 => Status::DuplicateType,
            -9 => Status::Borrowed,
            -10 => Status::InvalidArgument,
            -11 => Status::InvalidConfig,
            -12 => Status::Callback,
            _ => return None,
        };
        Some(status)
    }
}

/// Main error type for the runtime core
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// A message or operation the receiver does not implement. Optional
    /// protocol messages answer with this and callers treat it as a no-op.
    #[error("unsupported operation: {operation}")]
    Unsupported { operation: String },

    #[error("cannot copy an instance of '{type_name}'")]
    CannotCopy { type_name: String },

    /// The collector was triggered while code was executing, or reentrantly.
    #[error("runtime is locked")]
    Locked,

    #[error("type '{type_name}' failed to mark its children (status {code})")]
    MarkFailed { type_name: String, code: i32 },

    #[error("out of memory: {requested} bytes requested, {in_use} of {limit} bytes in use")]
    OutOfMemory {
        requested: usize,
        in_use: usize,
        limit: usize,
    },

    #[error("weak reference to '{type_name}' is no longer alive")]
    DeadReference { type_name: String },

    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("type '{0}' is already registered")]
    DuplicateType(String),

    /// The object is already borrowed further up the call stack.
    #[error("object is already borrowed")]
    Borrowed,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A caller-supplied callback failed. `code` is passed through unchanged.
    #[error("callback failed with status {code}: {message}")]
    Callback { code: i32, message: String },
}

impl RuntimeError {
    pub fn unsupported(operation: impl Into<String>) -> Self {
        RuntimeError::Unsupported {
            operation: operation.into(),
        }
    }

    pub fn cannot_copy(type_name: impl Into<String>) -> Self {
        RuntimeError::CannotCopy {
            type_name: type_name.into(),
        }
    }

    pub fn dead_reference(type_name: impl Into<String>) -> Self {
        RuntimeError::DeadReference {
            type_name: type_name.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        RuntimeError::InvalidArgument(message.into())
    }

    pub fn callback(code: i32, message: impl Into<String>) -> Self {
        RuntimeError::Callback {
            code,
            message: message.into(),
        }
    }

    /// Build an error from a status code returned by foreign code.
    pub fn from_code(code: i32, context: &str) -> Self {
        match Status::from_code(code) {
            Some(Status::Unsupported) => RuntimeError::unsupported(context),
            Some(Status::CannotCopy) => RuntimeError::cannot_copy(context),
            Some(Status::Locked) => RuntimeError::Locked,
            Some(Status::DeadReference) => RuntimeError::dead_reference(context),
            Some(Status::Borrowed) => RuntimeError::Borrowed,
            Some(Status::InvalidArgument) => RuntimeError::invalid_argument(context),
            _ => RuntimeError::callback(code, context),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, RuntimeError::Unsupported { .. })
    }

    pub fn status(&self) -> Status {
        match self {
            RuntimeError::Unsupported { .. } => Status::Unsupported,
            RuntimeError::CannotCopy { .. } => Status::CannotCopy,
            RuntimeError::Locked => Status::Locked,
            RuntimeError::MarkFailed { .. } => Status::MarkFailed,
            RuntimeError::OutOfMemory { .. } => Status::OutOfMemory,
            RuntimeError::DeadReference { .. } => Status::DeadReference,
            RuntimeError::UnknownType(_) => Status::UnknownType,
            RuntimeError::DuplicateType(_) => Status::DuplicateType,
            RuntimeError::Borrowed => Status::Borrowed,
            RuntimeError::InvalidArgument(_) => Status::InvalidArgument,
            RuntimeError::InvalidConfig(_) => Status::InvalidConfig,
            RuntimeError::Callback { .. } => Status::Callback,
        }
    }

    /// Wire code for this error. Callback failures keep the code the
    /// callback reported so it reaches the original caller unchanged.
    pub fn code(&self) -> i32 {
        match self {
            RuntimeError::Callback { code, .. } => *code,
            other => other.status().code(),
        }
    }
}
