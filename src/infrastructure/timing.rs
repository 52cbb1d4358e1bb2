//! Request timing middleware
//!
//! Measures every request outside the skip-list, feeds the response-time
//! tracker and stamps an `X-Response-Time` header. Body and status are
//! passed through untouched.

use crate::infrastructure::metrics::ResponseTimeTracker;
use crate::log_api;
use axum::{
    extract::{MatchedPath, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::Level;

pub const RESPONSE_TIME_HEADER: &str = "x-response-time";

/// Tracker path for requests that matched no route
pub const UNMATCHED_PATH: &str = "<unmatched>";

/// Paths that are neither timed nor recorded
pub const SKIP_PREFIXES: [&str; 6] = [
    "/docs",
    "/redoc",
    "/openapi.json",
    "/favicon.ico",
    "/metrics",
    "/internal",
];

#[derive(Clone)]
pub struct TimingState {
    pub tracker: Arc<ResponseTimeTracker>,
    pub slow_request_ms: f64,
}

pub fn is_skipped(path: &str) -> bool {
    SKIP_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// Tracker key for a request: method and path
pub fn endpoint_key(method: &str, path: &str) -> String {
    format!("{} {}", method, path)
}

pub async fn track_response_time(
    State(state): State<TimingState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_skipped(&path) {
        return next.run(request).await;
    }

    // Key on the route template, never the raw path
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or(UNMATCHED_PATH, MatchedPath::as_str);
    let endpoint = endpoint_key(request.method().as_str(), route);
    let start = Instant::now();

    let mut response = next.run(request).await;

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    let status = response.status().as_u16();
    state.tracker.record(&endpoint, elapsed_ms, status);

    if let Ok(value) = HeaderValue::from_str(&format!("{:.2}ms", elapsed_ms)) {
        response.headers_mut().insert(RESPONSE_TIME_HEADER, value);
    }

    if elapsed_ms > state.slow_request_ms {
        log_api!(Level::WARN, "Slow request: {} took {:.2}ms", endpoint, elapsed_ms);
    } else {
        log_api!(Level::DEBUG, "{} {} in {:.2}ms", endpoint, status, elapsed_ms);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::StatusCode,
        middleware,
        routing::get,
        Router,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    fn app_with_threshold(tracker: Arc<ResponseTimeTracker>, slow_request_ms: f64) -> Router {
        Router::new()
            .route("/service/ok", get(|| async { "ok" }))
            .route("/service/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/service/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    "slow"
                }),
            )
            .route("/metrics/stats", get(|| async { "stats" }))
            .layer(middleware::from_fn_with_state(
                TimingState {
                    tracker,
                    slow_request_ms,
                },
                track_response_time,
            ))
    }

    fn app(tracker: Arc<ResponseTimeTracker>) -> Router {
        app_with_threshold(tracker, 1000.0)
    }

    /// Counts WARN events on the api target
    struct ApiWarnings(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for ApiWarnings {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let metadata = event.metadata();
            if *metadata.level() == Level::WARN && metadata.target() == "api" {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn capture_api_warnings() -> (Arc<AtomicUsize>, tracing::subscriber::DefaultGuard) {
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber =
            tracing_subscriber::registry().with(ApiWarnings(Arc::clone(&warnings)));
        (warnings, tracing::subscriber::set_default(subscriber))
    }

    fn get_request(uri: &str) -> Request {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_skip_list() {
        assert!(is_skipped("/metrics/stats"));
        assert!(is_skipped("/internal/health"));
        assert!(is_skipped("/docs/index.html"));
        assert!(is_skipped("/favicon.ico"));
        assert!(!is_skipped("/service/sentiment/base"));
        assert!(!is_skipped("/"));
    }

    #[tokio::test]
    async fn test_records_and_sets_header() {
        let tracker = Arc::new(ResponseTimeTracker::new());
        let response = app(tracker.clone()).oneshot(get_request("/service/ok")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let header = response.headers()[RESPONSE_TIME_HEADER].to_str().unwrap();
        assert!(header.ends_with("ms"));
        assert!(header.trim_end_matches("ms").parse::<f64>().is_ok());

        let stats = tracker.stats("GET /service/ok");
        assert_eq!(stats.count, 1);
        assert_eq!(stats.success_rate, 100.0);
    }

    #[tokio::test]
    async fn test_status_passed_through_and_recorded() {
        let tracker = Arc::new(ResponseTimeTracker::new());
        let response = app(tracker.clone())
            .oneshot(get_request("/service/missing"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let stats = tracker.stats("GET /service/missing");
        assert_eq!(stats.count, 1);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_slow_request_warns_and_is_recorded() {
        let (warnings, _guard) = capture_api_warnings();
        let tracker = Arc::new(ResponseTimeTracker::new());
        let response = app_with_threshold(tracker.clone(), 5.0)
            .oneshot(get_request("/service/slow"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let header = response.headers()[RESPONSE_TIME_HEADER].to_str().unwrap();
        let elapsed: f64 = header.trim_end_matches("ms").parse().unwrap();
        assert!(elapsed >= 20.0);

        let stats = tracker.stats("GET /service/slow");
        assert_eq!(stats.count, 1);
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fast_request_does_not_warn() {
        let (warnings, _guard) = capture_api_warnings();
        let tracker = Arc::new(ResponseTimeTracker::new());
        app(tracker.clone()).oneshot(get_request("/service/ok")).await.unwrap();

        assert_eq!(tracker.stats("GET /service/ok").count, 1);
        assert_eq!(warnings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unmatched_paths_share_one_endpoint() {
        let tracker = Arc::new(ResponseTimeTracker::new());
        let app = app(tracker.clone());
        for i in 0..50 {
            let response = app
                .clone()
                .oneshot(get_request(&format!("/scan/{}", i)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        assert_eq!(tracker.endpoint_count(), 1);
        let stats = tracker.stats(&endpoint_key("GET", UNMATCHED_PATH));
        assert_eq!(stats.count, 50);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_skipped_paths_not_recorded() {
        let tracker = Arc::new(ResponseTimeTracker::new());
        let response = app(tracker.clone())
            .oneshot(get_request("/metrics/stats"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(RESPONSE_TIME_HEADER).is_none());
        assert_eq!(tracker.endpoint_count(), 0);
    }
}
