//! HTTP health verifier against a live server

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use deploykit::health::{HealthCheck, HttpHealthVerifier};
use deploykit::models::health::{HealthFailure, HealthVerdict};

/// Answers 503 for the first `failures` requests, then 200
#[derive(Clone)]
struct Flaky {
    failures: usize,
    hits: Arc<AtomicUsize>,
}

async fn health(State(flaky): State<Flaky>) -> StatusCode {
    let hit = flaky.hits.fetch_add(1, Ordering::SeqCst);
    if hit < flaky.failures {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn slow() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(2)).await;
    StatusCode::OK
}

async fn serve(failures: usize) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/health", get(health))
        .route("/slow", get(slow))
        .with_state(Flaky {
            failures,
            hits: hits.clone(),
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), hits)
}

fn verifier() -> HttpHealthVerifier {
    HttpHealthVerifier::new(Duration::from_millis(10)).unwrap()
}

#[tokio::test]
async fn test_healthy_on_first_attempt() {
    let (base, hits) = serve(0).await;
    let report = verifier()
        .probe(&format!("{}/health", base), Duration::from_secs(1), 3)
        .await;

    assert!(report.is_healthy());
    assert_eq!(report.results.len(), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recovers_within_attempts() {
    let (base, hits) = serve(2).await;
    let report = verifier()
        .probe(&format!("{}/health", base), Duration::from_secs(1), 3)
        .await;

    assert!(report.is_healthy());
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.results[0].status, Some(503));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unhealthy_after_all_attempts() {
    let (base, hits) = serve(usize::MAX).await;
    let report = verifier()
        .probe(&format!("{}/health", base), Duration::from_secs(1), 3)
        .await;

    assert_eq!(report.verdict, HealthVerdict::Unhealthy(HealthFailure::Status(503)));
    assert_eq!(report.results.len(), 3);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let (base, _) = serve(0).await;
    let report = verifier()
        .probe(&format!("{}/slow", base), Duration::from_millis(100), 1)
        .await;

    assert_eq!(report.verdict, HealthVerdict::Unhealthy(HealthFailure::Timeout));
    assert!(report.results[0].timed_out);
}

#[tokio::test]
async fn test_zero_attempts_probes_once() {
    let (base, hits) = serve(0).await;
    let report = verifier()
        .probe(&format!("{}/health", base), Duration::from_secs(1), 0)
        .await;

    assert!(report.is_healthy());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
