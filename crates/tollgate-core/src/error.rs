use thiserror::Error;

/// Operation not permitted.
pub const EPERM: i32 = 1;
/// Permission denied.
pub const EACCES: i32 = 13;
/// Invalid argument.
pub const EINVAL: i32 = 22;
pub const TRANSPORT_FAILURE: i32 = -1;
pub const HANDLER_FAILURE: i32 = -2;

/// Packs two 16-bit values into one integer, `upper` in the high half.
#[must_use]
pub fn make_int(upper: u16, lower: u16) -> i32 {
    ((u32::from(upper) << 16) | u32::from(lower)) as i32
}

/// Inverse of [`make_int`].
#[must_use]
pub fn split_int(value: i32) -> (u16, u16) {
    let bits = value as u32;
    ((bits >> 16) as u16, (bits & 0xffff) as u16)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdkError {
    #[error("sdk already initialized")]
    AlreadyInitialized,
    #[error("sdk not initialized")]
    NotInitialized,
    #[error("invalid parameters: {0}")]
    InvalidParameters(&'static str),
    #[error("no signed-in session")]
    NotSignedIn,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server error (status {status}, code {code}): {message}")]
    Server {
        status: u16,
        code: i64,
        message: String,
    },
    #[error("malformed response data: {0}")]
    Handler(String),
    #[error("identity token invalid")]
    IdentityTokenInvalid,
}

impl SdkError {
    /// Integer error code in the service's numeric convention.
    ///
    /// Server failures carry the HTTP status in the upper 16 bits and the
    /// application code in the lower 16 bits.
    pub fn code(&self) -> i32 {
        match self {
            Self::AlreadyInitialized | Self::NotInitialized | Self::NotSignedIn => EPERM,
            Self::InvalidParameters(_) => EINVAL,
            Self::Transport(_) => TRANSPORT_FAILURE,
            Self::Server { status, code, .. } => make_int(*status, *code as u16),
            Self::Handler(_) => HANDLER_FAILURE,
            Self::IdentityTokenInvalid => EACCES,
        }
    }

    /// Transport failures never reached application logic and can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
