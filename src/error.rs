use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Webhook verification failed"))]
    VerificationFailed,

    #[snafu(display("Resource not found: {resource}"))]
    NotFound { resource: String },

    #[snafu(display("Internal server error"))]
    InternalServerError {
        #[snafu(source(false))]
        source: Option<eyre::Report>,
    },

    #[snafu(display("Invalid parameter: {message}"))]
    InvalidParameter { message: String },
}

impl From<eyre::Report> for Error {
    fn from(e: eyre::Report) -> Self {
        Self::InternalServerError { source: Some(e) }
    }
}

impl Error {
    pub fn internal(e: impl Into<eyre::Report>) -> Self {
        Self::InternalServerError {
            source: Some(e.into()),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }
}

impl actix_web::ResponseError for Error {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            Self::VerificationFailed => actix_web::http::StatusCode::FORBIDDEN,
            Self::NotFound { .. } => actix_web::http::StatusCode::NOT_FOUND,
            Self::InvalidParameter { .. } => actix_web::http::StatusCode::BAD_REQUEST,
            Self::InternalServerError { .. } => {
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, ResponseError};

    use super::*;

    #[test]
    fn status_codes_match_error_kinds() {
        assert_eq!(
            Error::VerificationFailed.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::not_found("failed job k1").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::invalid_parameter("dedupe_key must not be empty").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::internal(eyre::eyre!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
