#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use actix_web::http::StatusCode;
use actix_web::{get, web, App, HttpResponse, HttpServer};
use serde_json::json;
use tracing::{error, info};

use crate::error::OomError;
use crate::service::AllocatorService;

#[derive(Clone)]
pub struct AppState {
    pub service: AllocatorService,
}

#[get("/alloc/hit")]
pub async fn hit(data: web::Data<AppState>) -> HttpResponse {
    match data.service.hit() {
        Ok(r) => HttpResponse::Ok().json(r),
        Err(e) => oom_error(&e),
    }
}

#[get("/alloc/status")]
pub async fn status(data: web::Data<AppState>) -> HttpResponse {
    match data.service.status() {
        Ok(st) => HttpResponse::Ok().json(st),
        Err(e) => oom_error(&e),
    }
}

#[get("/healthz")]
pub async fn healthz(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(data.service.health())
}

#[get("/metrics")]
pub async fn scrape_metrics(data: web::Data<AppState>) -> HttpResponse {
    match data.service.encode_metrics() {
        Ok(buf) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buf),
        Err(e) => {
            error!(error=%format!("{e:#}"), "encode metrics failed");
            HttpResponse::InternalServerError().body("encode metrics failed")
        }
    }
}

/// Register every route on an actix service config.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(hit)
        .service(status)
        .service(healthz)
        .service(scrape_metrics);
}

pub async fn serve(bind: &str, state: AppState) -> std::io::Result<()> {
    info!(bind, "starting http server");
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(routes)
    })
    .bind(bind)?
    .run()
    .await
}

fn oom_error(e: &OomError) -> HttpResponse {
    let code = if e.is_telemetry() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    json_error(code, &e.to_string())
}

fn json_error(code: StatusCode, reason: &str) -> HttpResponse {
    HttpResponse::build(code).json(json!({"status":"error","reason":reason}))
}
