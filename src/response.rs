//! Translation of raw HTTP responses into results or errors
//!
//! etcd signals failures on three overlapping channels: the transport, the
//! HTTP status and the `errorCode` in the JSON body. [`translate`] reconciles
//! the last two once, driven by the [`Acceptance`] of the calling operation.

use hyper::StatusCode;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::RawResponse;
use crate::types::{EtcdResult, ResponseMeta};

/// HTTP statuses and service error codes an operation treats as normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acceptance {
    /// Statuses that go on to body parsing
    pub http_statuses: &'static [u16],
    /// Service error codes returned as a result instead of an error
    pub error_codes: &'static [u32],
}

impl Acceptance {
    /// New acceptance table
    pub const fn new(http_statuses: &'static [u16], error_codes: &'static [u32]) -> Self {
        Self {
            http_statuses,
            error_codes,
        }
    }

    /// Whether `status` is accepted
    pub fn accepts_status(&self, status: u16) -> bool {
        self.http_statuses.contains(&status)
    }

    /// Whether service error `code` is accepted
    pub fn accepts_code(&self, code: u32) -> bool {
        self.error_codes.contains(&code)
    }
}

/// Turn a raw response into an [`EtcdResult`] or a typed [`Error`].
///
/// - status not accepted: [`Error::HttpStatus`], unless it is a 400 with a
///   body, which carries a service error and is parsed instead
/// - body not a JSON result: [`Error::BodyParse`]
/// - error code not accepted: [`Error::Service`]
///
/// An accepted error code comes back as a result with `is_error()` set and
/// no nodes.
pub fn translate(response: RawResponse, acceptance: &Acceptance) -> Result<EtcdResult> {
    let status = response.status.as_u16();

    if !acceptance.accepts_status(status)
        && (response.status != StatusCode::BAD_REQUEST || response.body.trim().is_empty())
    {
        debug!("Rejecting response with status {} {}", status, response.reason);
        return Err(Error::HttpStatus {
            status,
            reason: response.reason,
        });
    }

    let mut result: EtcdResult = serde_json::from_str(&response.body)?;
    result.meta = ResponseMeta::from_headers(&response.headers);

    if let Some(err) = result.error() {
        result.node = None;
        result.prev_node = None;
        if !acceptance.accepts_code(err.code) {
            debug!("Rejecting service error {} on status {}", err.code, status);
            return Err(Error::Service(err));
        }
    }

    Ok(result)
}
