use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

/// Management responses are wrapped: `{success, data?}` on the happy path,
/// `{success, error}` on failure, `{success, message}` for fire-and-forget
/// acknowledgements.
#[derive(Serialize)]
pub(crate) struct ApiData<T: Serialize> {
    pub(crate) success: bool,
    pub(crate) data: T,
}

pub(crate) fn ok_data<T: Serialize>(data: T) -> Json<ApiData<T>> {
    Json(ApiData {
        success: true,
        data,
    })
}

#[derive(Serialize)]
pub(crate) struct ApiMessage {
    pub(crate) success: bool,
    pub(crate) message: String,
}

pub(crate) fn ok_message(message: impl Into<String>) -> Json<ApiMessage> {
    Json(ApiMessage {
        success: true,
        message: message.into(),
    })
}

#[derive(Serialize)]
struct ApiErrorBody {
    success: bool,
    error: String,
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Internal(err) => {
                tracing::error!(err = %err, "api internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (
            status,
            Json(ApiErrorBody {
                success: false,
                error: msg,
            }),
        )
            .into_response()
    }
}
