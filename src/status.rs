use axerrno::{AxError, AxResult};

/// The status reported back to the host for a completed request.
///
/// Internal code only ever produces [`AxError`]s; they are translated into a
/// `HostStatus` once, at the outermost request boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostStatus {
    /// The request completed.
    Success,
    /// A parameter of the request was rejected.
    InvalidParameter,
    /// A transient condition prevented the request, the caller may reissue it.
    Retry,
    /// The response did not fit into the caller's buffer.
    BufferOverflow,
    /// An internal invariant was broken.
    InternalError,
    /// No supported virtualization backend exists for this host.
    Unsupported,
    /// The addressed object does not exist.
    ObjectNotFound,
    /// Any other backend error, passed through as its raw code.
    Unsuccessful(i32),
}

impl HostStatus {
    /// Whether this status reports a completed request.
    pub const fn is_success(self) -> bool {
        matches!(self, HostStatus::Success)
    }
}

/// Translates an internal error kind into the host-facing status code.
pub fn translate(err: AxError) -> HostStatus {
    match err {
        AxError::InvalidInput => HostStatus::InvalidParameter,
        AxError::WouldBlock => HostStatus::Retry,
        AxError::StorageFull => HostStatus::BufferOverflow,
        AxError::BadState | AxError::BadAddress => HostStatus::InternalError,
        AxError::Unsupported => HostStatus::Unsupported,
        AxError::NotFound => HostStatus::ObjectNotFound,
        other => HostStatus::Unsuccessful(other as i32),
    }
}

/// Translates the outcome of an operation, mapping `Ok` to [`HostStatus::Success`].
pub fn status_of<T>(result: &AxResult<T>) -> HostStatus {
    match result {
        Ok(_) => HostStatus::Success,
        Err(err) => translate(*err),
    }
}
