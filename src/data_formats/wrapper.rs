use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

/// The JSON envelope every endpoint answers with.
///
/// A 2xx status carries its payload under `data`; anything else carries it under `error`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub status: u16,
    pub message: &'static str,
    #[serde(flatten)]
    pub payload: Payload<T>,
    #[serde(skip)]
    code: StatusCode,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload<T> {
    Data(T),
    Error(ErrorBody),
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ErrorBody {
    Message(String),
    List(Vec<String>),
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(code: StatusCode, data: T) -> Self {
        if code.is_success() {
            Self {
                ok: true,
                status: code.as_u16(),
                message: "Success",
                payload: Payload::Data(data),
                code,
            }
        } else {
            let body = match serde_json::to_value(&data) {
                Ok(serde_json::Value::String(message)) => ErrorBody::Message(message),
                Ok(value) => ErrorBody::Message(value.to_string()),
                Err(e) => ErrorBody::Message(e.to_string()),
            };
            Self::failure(code, body)
        }
    }

    pub fn ok(data: T) -> Self {
        Self::new(StatusCode::OK, data)
    }

    pub fn created(data: T) -> Self {
        Self::new(StatusCode::CREATED, data)
    }

    pub fn failure(code: StatusCode, error: ErrorBody) -> Self {
        Self {
            ok: false,
            status: code.as_u16(),
            message: "Failed",
            payload: Payload::Error(error),
            code,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> axum::response::Response {
        (self.code, Json(self)).into_response()
    }
}
