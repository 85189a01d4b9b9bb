//! The HTTP surface (§6): a hand-written `match (method, path)` dispatcher
//! over hyper 0.14, in the same spirit as the teacher's `service.rs` (which
//! dispatches on the S3 wire protocol via the `s3s` crate) — generalized
//! here to a bespoke JSON API, since this service doesn't speak S3 itself.

mod dto;
mod handlers;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info};

use crate::core::Core;
use crate::error::ApiError;

pub async fn serve(core: Arc<Core>, addr: SocketAddr, shutdown: impl std::future::Future<Output = ()>) -> anyhow::Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let core = core.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| dispatch(core.clone(), req))) }
    });

    let server = Server::bind(&addr).serve(make_svc);
    info!(%addr, "metadata service listening");
    server.with_graceful_shutdown(shutdown).await?;
    info!("metadata service stopped");
    Ok(())
}

async fn parse_body<T: DeserializeOwned>(req: Request<Body>) -> Result<T, ApiError> {
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read request body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(bytes) => Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Body::from(bytes))
            .unwrap_or_else(|_| Response::new(Body::empty())),
        Err(e) => {
            error!(error = %e, "failed to serialize response body");
            error_response(&ApiError::Internal("failed to serialize response".into()))
        }
    }
}

fn error_response(err: &ApiError) -> Response<Body> {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Response::builder().status(status).header("content-type", "text/plain").body(Body::from(err.body())).unwrap_or_else(|_| {
        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        resp
    })
}

fn ok<T: Serialize>(result: Result<T, ApiError>) -> Response<Body> {
    match result {
        Ok(value) => json_response(StatusCode::OK, &value),
        Err(e) => error_response(&e),
    }
}

async fn dispatch(core: Arc<Core>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method.clone(), path.as_str()) {
        (Method::GET, "/healthz") => Response::new(Body::from(handlers::healthz())),

        (Method::POST, "/register_buckets") => handle(&core, req, handlers::register_buckets).await,
        (Method::POST, "/start_create_bucket") => handle(&core, req, handlers::start_create_bucket).await,
        (Method::PATCH, "/complete_create_bucket") => handle(&core, req, handlers::complete_create_bucket).await,
        (Method::POST, "/start_delete_bucket") => handle(&core, req, handlers::start_delete_bucket).await,
        (Method::PATCH, "/complete_delete_bucket") => handle(&core, req, handlers::complete_delete_bucket).await,
        (Method::POST, "/locate_bucket") => handle(&core, req, handlers::locate_bucket).await,
        (Method::POST, "/locate_bucket_status") => handle(&core, req, handlers::locate_bucket_status).await,
        (Method::POST, "/head_bucket") => handle(&core, req, handlers::head_bucket).await,
        (Method::POST, "/list_buckets") => ok(handlers::list_buckets(&core).await),
        (Method::POST, "/put_bucket_versioning") => handle(&core, req, handlers::put_bucket_versioning).await,
        (Method::POST, "/check_version_setting") => handle(&core, req, handlers::check_version_setting).await,

        (Method::POST, "/start_upload") => handle(&core, req, handlers::start_upload).await,
        (Method::PATCH, "/complete_upload") => handle(&core, req, handlers::complete_upload).await,
        (Method::POST, "/locate_object") => handle_locate_object(&core, req).await,
        (Method::POST, "/locate_object_status") => handle(&core, req, handlers::locate_object_status).await,
        (Method::POST, "/head_object") => handle(&core, req, handlers::head_object).await,
        (Method::POST, "/list_objects") => handle(&core, req, handlers::list_objects).await,
        (Method::POST, "/list_objects_versioning") => handle(&core, req, handlers::list_objects_versioning).await,
        (Method::POST, "/start_delete_objects") => handle(&core, req, handlers::start_delete_objects).await,
        (Method::PATCH, "/complete_delete_objects") => handle(&core, req, handlers::complete_delete_objects).await,

        (Method::PATCH, "/set_multipart_id") => handle(&core, req, handlers::set_multipart_id).await,
        (Method::PATCH, "/append_part") => handle(&core, req, handlers::append_part).await,
        (Method::POST, "/continue_upload") => handle(&core, req, handlers::continue_upload).await,
        (Method::POST, "/list_parts") => handle(&core, req, handlers::list_parts).await,
        (Method::POST, "/list_multipart_uploads") => handle(&core, req, handlers::list_multipart_uploads).await,

        (Method::POST, "/start_warmup") => handle(&core, req, handlers::start_warmup).await,
        (Method::POST, "/clean_object") => handle(&core, req, handlers::clean_object).await,
        (Method::POST, "/clean_out_remaining") => handle(&core, req, handlers::clean_out_remaining).await,

        (Method::POST, "/update_policy") => handle(&core, req, handlers::update_policy).await,
        (Method::POST, "/update_metrics") => handle(&core, req, handlers::update_metrics).await,

        _ => {
            let mut resp = Response::new(Body::from("not found"));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            resp
        }
    };

    Ok(response)
}

/// `locate_object` needs the owning `Arc<Core>` (not just a borrow) so it
/// can spawn the background `clean_object` sweep on an hour boundary
/// (§4.4) without the spawned task outliving the request's borrow.
async fn handle_locate_object(core: &Arc<Core>, req: Request<Body>) -> Response<Body> {
    let body: dto::LocateObjectRequestBody = match parse_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    ok(handlers::locate_object(core, body).await)
}

/// Parses the JSON body, runs `handler`, and serializes the result — the
/// one shape nearly every endpoint in §6 shares.
async fn handle<'a, Req, Res, F, Fut>(core: &'a Core, req: Request<Body>, handler: F) -> Response<Body>
where
    Req: DeserializeOwned,
    Res: Serialize,
    F: FnOnce(&'a Core, Req) -> Fut,
    Fut: std::future::Future<Output = Result<Res, ApiError>> + 'a,
{
    let body: Req = match parse_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };
    ok(handler(core, body).await)
}
