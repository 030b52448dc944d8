use thiserror::Error;

/// Maximum length for error response bodies in error messages
pub const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("API request failed (HTTP {status}): {body}{}", hint(.status))]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid API URL {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

fn hint(status: &u16) -> &'static str {
    match *status {
        401 => "; the token may have expired, run `atl auth refresh` or `atl auth login`",
        403 => "; the token lacks a required scope, run `atl auth login` with the needed scopes",
        _ => "",
    }
}

impl ApiError {
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        ApiError::Status {
            status: status.as_u16(),
            body: truncate_body(body),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

/// Truncate a response body to avoid logging excessive data.
/// Cuts on a char boundary at or below [`MAX_ERROR_BODY_LENGTH`] bytes.
pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_hint() {
        let err = ApiError::from_status(reqwest::StatusCode::UNAUTHORIZED, "nope");
        assert!(err.is_unauthorized());
        assert!(err.to_string().contains("atl auth refresh"));
    }

    #[test]
    fn test_truncate_short_body_untouched() {
        assert_eq!(truncate_body("oops"), "oops");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let body = "é".repeat(400);
        let truncated = truncate_body(&body);
        assert!(truncated.contains("truncated, 800 total bytes"));
        assert!(truncated.starts_with("éé"));
    }

    #[test]
    fn test_long_body_is_truncated() {
        let err = ApiError::from_status(reqwest::StatusCode::BAD_REQUEST, &"x".repeat(2000));
        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, 400);
                assert!(body.len() < 600);
                assert!(body.ends_with("(truncated, 2000 total bytes)"));
            },
            other => panic!("unexpected: {other:?}"),
        }
    }
}
