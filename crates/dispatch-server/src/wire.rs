use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dispatch_core::{DispatchError, ErrorKind};
use serde::Serialize;

/// The JSON body of every non-2xx response: a stable `kind` string a client
/// can branch on, plus a human-readable message.
#[derive(Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        self.body.kind
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::NoJobAvailable => StatusCode::NOT_FOUND,
            ErrorKind::UnknownJob
            | ErrorKind::EmptyCommand
            | ErrorKind::CommandNotWhitelisted
            | ErrorKind::InvalidId => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: ErrorBody {
                kind: kind.as_str(),
                message: err.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub fn invalid_id(message: impl Into<String>) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        body: ErrorBody {
            kind: ErrorKind::InvalidId.as_str(),
            message: message.into(),
        },
    }
}

pub fn internal(message: impl Into<String>) -> ApiError {
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorBody {
            kind: ErrorKind::Internal.as_str(),
            message: message.into(),
        },
    }
}
