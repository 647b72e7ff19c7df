//! Inbound provider webhook.
//!
//! The GET handshake echoes the challenge when the shared verify token
//! matches. POST bodies (delivery receipts, inbound replies) are logged and
//! acknowledged; they do not feed back into the queue's state machine.

use actix_web::{get, post, web, HttpResponse, Responder, Scope};
use serde::Deserialize;
use tracing::info;

use crate::{error::Error, service::Service};

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: String,
    #[serde(rename = "hub.verify_token")]
    verify_token: String,
    #[serde(rename = "hub.challenge")]
    challenge: String,
}

#[get("")]
async fn verify(
    service: web::Data<Service>,
    query: web::Query<VerifyQuery>,
) -> Result<impl Responder, Error> {
    let expected = service.config().verify_token().map_err(Error::internal)?;

    if query.mode != "subscribe" || query.verify_token != expected {
        return Err(Error::VerificationFailed);
    }

    Ok(HttpResponse::Ok().body(query.into_inner().challenge))
}

#[post("")]
async fn receive(event: web::Json<serde_json::Value>) -> Result<impl Responder, Error> {
    info!(event = %event.into_inner(), "provider webhook event");

    Ok(HttpResponse::Ok().finish())
}

pub fn service() -> Scope {
    web::scope("/webhook").service(verify).service(receive)
}
