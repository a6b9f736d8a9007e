//! HTTP API surface (C7 front door). Every handler is a thin translation
//! layer: parse/validate the request, call into `AppState`'s services,
//! wrap the result in the `{success, data, message?}` envelope.

pub mod admin;
pub mod behavior;
pub mod profile;
pub mod recommendations;
pub mod system;

use actix_web::HttpResponse;
use serde::Serialize;

#[derive(Serialize)]
struct SuccessEnvelope<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

pub fn ok(data: impl Serialize) -> HttpResponse {
    HttpResponse::Ok().json(SuccessEnvelope {
        success: true,
        data,
        message: None,
    })
}

pub fn ok_with_message(data: impl Serialize, message: impl Into<String>) -> HttpResponse {
    HttpResponse::Ok().json(SuccessEnvelope {
        success: true,
        data,
        message: Some(message.into()),
    })
}
