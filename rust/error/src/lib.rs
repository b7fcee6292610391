// Status codes follow the gRPC numbering so that a transport layer can map them
// without a lookup table. Errors raised by the aggregation core pick one of these
// to tell the caller whether the failure is a setup bug, bad data or an internal fault.
use std::error::Error;

#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum ErrorCodes {
    // OK is returned on success, we use "Success" since Ok is a keyword in Rust.
    Success = 0,
    // UNKNOWN indicates an unknown error.
    Unknown = 2,
    // INVALID_ARGUMENT indicates the caller specified an invalid argument.
    InvalidArgument = 3,
    // NOT_FOUND means some requested entity was not found.
    NotFound = 5,
    // ALREADY_EXISTS means an entity that we attempted to create already exists.
    AlreadyExists = 6,
    // FAILED_PRECONDITION indicates the operation was rejected because the system is not in a state required for the operation's execution.
    FailedPrecondition = 9,
    // OUT_OF_RANGE means the operation was attempted past the valid range.
    OutOfRange = 11,
    // UNIMPLEMENTED indicates the operation is not implemented or not supported.
    Unimplemented = 12,
    // INTERNAL errors are internal errors.
    Internal = 13,
    // DATA_LOSS indicates a payload could not be decoded or is corrupt.
    DataLoss = 15,
}

impl ErrorCodes {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCodes::InvalidArgument => "InvalidArgumentError",
            ErrorCodes::NotFound => "NotFoundError",
            ErrorCodes::FailedPrecondition => "FailedPreconditionError",
            ErrorCodes::Unimplemented => "UnimplementedError",
            ErrorCodes::Internal => "InternalError",
            ErrorCodes::DataLoss => "DataLossError",
            _ => "SiftError",
        }
    }

    /// Structural errors are query-setup bugs; retrying the same call cannot succeed.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ErrorCodes::InvalidArgument
                | ErrorCodes::FailedPrecondition
                | ErrorCodes::Unimplemented
                | ErrorCodes::AlreadyExists
        )
    }
}

impl From<u32> for ErrorCodes {
    fn from(value: u32) -> Self {
        match value {
            0 => ErrorCodes::Success,
            3 => ErrorCodes::InvalidArgument,
            5 => ErrorCodes::NotFound,
            6 => ErrorCodes::AlreadyExists,
            9 => ErrorCodes::FailedPrecondition,
            11 => ErrorCodes::OutOfRange,
            12 => ErrorCodes::Unimplemented,
            13 => ErrorCodes::Internal,
            15 => ErrorCodes::DataLoss,
            _ => ErrorCodes::Unknown,
        }
    }
}

pub trait SiftError: Error + Send + Sync {
    fn code(&self) -> ErrorCodes;
    fn boxed(self) -> Box<dyn SiftError>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
    fn should_trace_error(&self) -> bool {
        true
    }
}

impl Error for Box<dyn SiftError> {}

impl SiftError for Box<dyn SiftError> {
    fn code(&self) -> ErrorCodes {
        self.as_ref().code()
    }

    fn should_trace_error(&self) -> bool {
        self.as_ref().should_trace_error()
    }
}
