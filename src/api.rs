use actix_web::{get, post, web, Responder, Scope};
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    history::DeliveryRecord,
    job::{Enqueue, FallbackPayload, Job},
    service::Service,
};

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    dedupe_key: String,
    to: Option<String>,
    body: String,
    fallback: Option<FallbackPayload>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    outcome: Enqueue,
}

#[post("")]
async fn enqueue(
    service: web::Data<Service>,
    request: web::Json<EnqueueRequest>,
) -> Result<impl Responder, Error> {
    let request = request.into_inner();

    if request.dedupe_key.is_empty() {
        return Err(Error::invalid_parameter("dedupe_key must not be empty"));
    }

    let outcome = service
        .enqueue(
            &request.dedupe_key,
            request.to.as_deref(),
            &request.body,
            request.fallback.as_ref(),
        )
        .await?;

    Ok(web::Json(EnqueueResponse { outcome }))
}

#[derive(Serialize)]
pub struct ListJobsResponse {
    jobs: Vec<Job>,
}

#[get("")]
async fn list_jobs(service: web::Data<Service>) -> Result<impl Responder, Error> {
    let jobs = service.list_jobs().await?;

    Ok(web::Json(ListJobsResponse { jobs }))
}

#[post("/{id}/reset")]
async fn reset_job(
    service: web::Data<Service>,
    path: web::Path<String>,
) -> Result<impl Responder, Error> {
    if !service.reset_failed(&path).await? {
        return Err(Error::not_found(format!("failed job {}", *path)));
    }

    Ok("OK")
}

#[derive(Serialize)]
pub struct HistoryResponse {
    entries: Vec<DeliveryRecord>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
}

#[get("/history")]
async fn history(
    service: web::Data<Service>,
    query: web::Query<HistoryQuery>,
) -> Result<impl Responder, Error> {
    let entries = service.history(query.limit.unwrap_or(100)).await?;

    Ok(web::Json(HistoryResponse { entries }))
}

pub fn service() -> Scope {
    web::scope("/jobs")
        .service(history)
        .service(enqueue)
        .service(list_jobs)
        .service(reset_job)
}
