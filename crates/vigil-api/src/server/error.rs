#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "server io error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

#[derive(Debug)]
struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl HttpApiError {
    fn invalid_request(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new(ErrorCode::InvalidRequest, message, details),
        }
    }

    fn forbidden(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            error: ApiError::new(ErrorCode::Forbidden, message, details),
        }
    }

    fn from_tracker(err: TrackerError) -> Self {
        match err {
            TrackerError::Validation(detail) => Self {
                status: StatusCode::BAD_REQUEST,
                error: ApiError::new(ErrorCode::InvalidRequest, "invalid request", Some(detail)),
            },
            TrackerError::NotFound(detail) => Self {
                status: StatusCode::NOT_FOUND,
                error: ApiError::new(ErrorCode::NotFound, "resource not found", Some(detail)),
            },
            TrackerError::Forbidden(detail) => Self {
                status: StatusCode::FORBIDDEN,
                error: ApiError::new(ErrorCode::Forbidden, "not allowed", Some(detail)),
            },
            TrackerError::Conflict(detail) => Self {
                status: StatusCode::CONFLICT,
                error: ApiError::new(ErrorCode::Conflict, "conflicting state", Some(detail)),
            },
            TrackerError::Store(err) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                error: ApiError::new(
                    ErrorCode::InternalError,
                    "storage operation failed",
                    Some(err.to_string()),
                ),
            },
        }
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}
