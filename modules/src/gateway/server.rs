use async_trait::async_trait;
use jatsl::{Job, JobManager};
use library::communication::broker::BrokerConnector;
use library::communication::request::{RequestDispatcher, RequestError};
use library::communication::BlackboxError;
use library::EmptyResult;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, info, warn};
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::hyper::Body;
use warp::reject::{LengthRequired, MethodNotAllowed, PayloadTooLarge};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

#[derive(Debug, Deserialize)]
struct CompileRequest {
    file: Option<String>,
}

#[derive(Debug, Error)]
enum BodyError {
    #[error("request body is not valid JSON")]
    Malformed(#[source] serde_json::Error),
    #[error("missing field `file`")]
    MissingFile,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    causes: &'a [String],
}

fn error_reply(status: StatusCode, error: &BlackboxError) -> Response {
    let message = error.to_string();
    let body = ErrorBody {
        error: &message,
        causes: error.causes(),
    };

    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

fn status_for(error: &RequestError) -> StatusCode {
    match error {
        RequestError::InvalidRequest => StatusCode::BAD_REQUEST,
        RequestError::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
        RequestError::Connection(_) | RequestError::Publish(_) | RequestError::Timeout(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Extracts the unit of work from a request body, empty files are left for the dispatcher to refuse
fn parse_request(body: &[u8]) -> Result<Vec<u8>, BodyError> {
    let request: CompileRequest = serde_json::from_slice(body).map_err(BodyError::Malformed)?;

    request
        .file
        .map(String::into_bytes)
        .ok_or(BodyError::MissingFile)
}

async fn compile<K: BrokerConnector>(
    body: Bytes,
    dispatcher: RequestDispatcher<K>,
) -> Result<Response, Infallible> {
    let payload = match parse_request(&body) {
        Ok(payload) => payload,
        Err(error) => {
            debug!(%error, "Rejecting malformed request");
            return Ok(error_reply(StatusCode::BAD_REQUEST, &BlackboxError::new(error)));
        }
    };

    match dispatcher.submit(payload).await {
        Ok(reply) => Ok(Response::new(Body::from(reply))),
        Err(error) => {
            let status = status_for(&error);

            if status.is_server_error() {
                warn!(%error, "Compile request failed");
            }

            Ok(error_reply(status, &BlackboxError::new(error)))
        }
    }
}

async fn recover(rejection: Rejection) -> Result<Response, Rejection> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not found")
    } else if rejection.find::<PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "request body is too large")
    } else if rejection.find::<LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "content length is required")
    } else if rejection.find::<MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        return Err(rejection);
    };

    Ok(error_reply(status, &BlackboxError::from_message(message)))
}

/// Filter serving `POST /compile`
pub fn compile_filter<K: BrokerConnector>(
    dispatcher: RequestDispatcher<K>,
    max_body_size: u64,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let dispatcher = warp::any().map(move || dispatcher.clone());

    warp::path("compile")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(max_body_size))
        .and(warp::body::bytes())
        .and(dispatcher)
        .and_then(compile)
        .recover(recover)
        .unify()
}

/// HTTP server handing compile requests to the [`RequestDispatcher`]
pub struct ServerJob<K: BrokerConnector> {
    port: u16,
    max_body_size: u64,
    dispatcher: RequestDispatcher<K>,
}

impl<K: BrokerConnector> ServerJob<K> {
    /// Creates a new instance from raw parts
    pub fn new(port: u16, max_body_size: u64, dispatcher: RequestDispatcher<K>) -> Self {
        Self {
            port,
            max_body_size,
            dispatcher,
        }
    }
}

#[async_trait]
impl<K: BrokerConnector> Job for ServerJob<K> {
    const NAME: &'static str = module_path!();
    const SUPPORTS_GRACEFUL_TERMINATION: bool = true;

    async fn execute(&self, manager: JobManager) -> EmptyResult {
        let routes = compile_filter(self.dispatcher.clone(), self.max_body_size)
            .with(warp::trace::named("compile"))
            .with(warp::trace::request());

        let source_addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let (addr, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(source_addr, manager.termination_signal())?;

        info!(?addr, "Accepting compile requests");
        manager.ready().await;
        server.await;

        Ok(())
    }
}
