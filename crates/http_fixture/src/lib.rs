//! In-process axum server for the scraper, validator and pipeline tests.
//!
//! Every request that reaches the server is recorded, so tests can assert
//! hit counts and the `Referer` each fetch carried.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{Html, Response},
    routing::{get, MethodRouter},
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub use axum::routing;
pub use axum::Router;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub method:  String,
    pub path:    String,
    pub referer: Option<String>,
}

#[derive(Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<SeenRequest>>>);

impl RequestLog {
    pub fn all(&self) -> Vec<SeenRequest> {
        self.0.lock().unwrap().clone()
    }

    /// Requests to `path`, any method.
    pub fn hits(&self, path: &str) -> usize {
        self.all().iter().filter(|r| r.path == path).count()
    }

    /// `Referer` of the first request to `path`.
    pub fn referer_of(&self, path: &str) -> Option<String> {
        self.all().into_iter().find(|r| r.path == path).and_then(|r| r.referer)
    }
}

async fn record(State(log): State<RequestLog>, request: Request<Body>, next: Next) -> Response {
    let seen = SeenRequest {
        method:  request.method().to_string(),
        path:    request.uri().path().to_string(),
        referer: request
            .headers()
            .get(header::REFERER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    log.0.lock().unwrap().push(seen);
    next.run(request).await
}

/// Serves `router` on an ephemeral port. Unknown paths answer 404.
/// Returns the base URL (e.g. `http://127.0.0.1:40123`) and the request log.
pub async fn serve(router: Router) -> (String, RequestLog) {
    let log = RequestLog::default();
    let app = router.layer(middleware::from_fn_with_state(log.clone(), record));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}"), log)
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// GET (and implicit HEAD) route answering `status` with `body`.
pub fn page(status: u16, body: impl Into<String>) -> MethodRouter {
    let status = status_code(status);
    let body = body.into();
    get(move || async move { (status, Html(body)) })
}

/// Like `page`, but the first `failures` requests answer 503.
pub fn flaky(failures: usize, status: u16, body: impl Into<String>) -> MethodRouter {
    let status = status_code(status);
    let body = body.into();
    let calls = Arc::new(AtomicUsize::new(0));
    get(move || async move {
        if calls.fetch_add(1, Ordering::SeqCst) < failures {
            (StatusCode::SERVICE_UNAVAILABLE, Html("busy".to_string()))
        } else {
            (status, Html(body))
        }
    })
}
