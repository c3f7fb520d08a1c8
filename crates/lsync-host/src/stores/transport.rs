//! Mapping of HTTP transport failures onto [`StoreError`].

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};

use super::StoreError;

const MAX_ERROR_BODY: usize = 512;

pub(crate) fn from_reqwest(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        return StoreError::Timeout(err.to_string());
    }
    if err.is_connect() || is_connection_reset(&err) {
        return StoreError::ConnectionReset(err.to_string());
    }
    if err.is_decode() {
        return StoreError::Decode(err.to_string());
    }
    StoreError::Other(err.to_string())
}

fn is_connection_reset(err: &(dyn StdError + 'static)) -> bool {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        source = inner.source();
    }
    false
}

/// Pass successful responses through; classify everything else.
pub(crate) async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(StoreError::RateLimited { retry_after })
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            Err(StoreError::Timeout(format!("upstream returned {status}")))
        }
        _ => {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            Err(StoreError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}
