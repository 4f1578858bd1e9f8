// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Request pipeline against a mock REST server: bearer attachment, the
//! single-flight refresh and the one-retry rule.

use std::sync::Arc;
use std::time::Duration;

use posture_agent::{
    ApiRequest, AuthState, CredentialStore, Credentials, MemoryCredentialStore,
    PostureAgentError, ReqwestTransport, RequestPipeline,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pipeline_for(server: &MockServer, credentials: Arc<MemoryCredentialStore>) -> RequestPipeline {
    let transport = ReqwestTransport::new(format!("{}/api", server.uri()), Duration::from_secs(5))
        .unwrap();
    RequestPipeline::new(Arc::new(transport), credentials)
}

fn stored(access: &str, refresh: &str) -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
        access, refresh,
    )))
}

async fn mount_stats(server: &MockServer, bearer: &str, status: u16) {
    let template = if status == 200 {
        ResponseTemplate::new(200).set_body_json(json!({"total_sessions": 4}))
    } else {
        ResponseTemplate::new(status).set_body_json(json!({"detail": "Token is invalid or expired"}))
    };
    Mock::given(method("GET"))
        .and(path("/api/posture/stats/"))
        .and(header("authorization", format!("Bearer {}", bearer).as_str()))
        .respond_with(template)
        .mount(server)
        .await;
}

#[tokio::test]
async fn valid_token_is_attached_and_no_refresh_happens() {
    let server = MockServer::start().await;
    mount_stats(&server, "access-1", 200).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let pipeline = pipeline_for(&server, stored("access-1", "refresh-1"));
    let body: Value = pipeline
        .send_json(&ApiRequest::get("posture/stats/"))
        .await
        .unwrap();
    assert_eq!(body["total_sessions"], 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rejections_share_one_refresh() {
    let server = MockServer::start().await;
    mount_stats(&server, "stale", 401).await;
    mount_stats(&server, "fresh", 200).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh/"))
        .and(body_json(json!({"refresh": "refresh-1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": "fresh"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let credentials = stored("stale", "refresh-1");
    let pipeline = Arc::new(pipeline_for(&server, credentials.clone()));

    let requests = (0..5).map(|_| {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.send(&ApiRequest::get("posture/stats/")).await })
    });
    for outcome in futures::future::join_all(requests).await {
        let response = outcome.unwrap().unwrap();
        assert_eq!(response.status, 200);
    }

    assert_eq!(credentials.access_token().as_deref(), Some("fresh"));
    // Refresh token was not rotated
    assert_eq!(credentials.refresh_token().as_deref(), Some("refresh-1"));

    // Every request went out once with the stale token and was retried once
    let received = server.received_requests().await.unwrap();
    let bearers: Vec<_> = received
        .iter()
        .filter(|request| request.url.path() == "/api/posture/stats/")
        .map(|request| {
            request
                .headers
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string()
        })
        .collect();
    assert_eq!(bearers.len(), 10);
    assert_eq!(bearers.iter().filter(|b| *b == "Bearer stale").count(), 5);
    assert_eq!(bearers.iter().filter(|b| *b == "Bearer fresh").count(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn staggered_rejections_still_refresh_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/posture/stats/"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"detail": "Token is invalid or expired"}))
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&server)
        .await;
    mount_stats(&server, "fresh", 200).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "fresh"})))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = stored("stale", "refresh-1");
    let pipeline = Arc::new(pipeline_for(&server, credentials.clone()));

    // Later requests are rejected after the first refresh already finished
    let mut requests = Vec::new();
    for _ in 0..4 {
        let pipeline = pipeline.clone();
        requests.push(tokio::spawn(async move {
            pipeline.send(&ApiRequest::get("posture/stats/")).await
        }));
        tokio::time::sleep(Duration::from_millis(60)).await;
    }
    for outcome in futures::future::join_all(requests).await {
        assert_eq!(outcome.unwrap().unwrap().status, 200);
    }
    assert_eq!(credentials.access_token().as_deref(), Some("fresh"));
}

#[tokio::test]
async fn rotated_refresh_token_is_stored() {
    let server = MockServer::start().await;
    mount_stats(&server, "stale", 401).await;
    mount_stats(&server, "fresh", 200).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access": "fresh", "refresh": "refresh-2"})),
        )
        .mount(&server)
        .await;

    let credentials = stored("stale", "refresh-1");
    let pipeline = pipeline_for(&server, credentials.clone());
    pipeline
        .send(&ApiRequest::get("posture/stats/"))
        .await
        .unwrap();

    assert_eq!(credentials.refresh_token().as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn second_rejection_after_refresh_is_auth_failed() {
    let server = MockServer::start().await;
    mount_stats(&server, "stale", 401).await;
    mount_stats(&server, "fresh", 401).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "fresh"})))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = pipeline_for(&server, stored("stale", "refresh-1"));
    let result = pipeline.send(&ApiRequest::get("posture/stats/")).await;

    assert!(matches!(result, Err(PostureAgentError::AuthFailed(_))));
    let requests = server.received_requests().await.unwrap();
    let stats_calls = requests
        .iter()
        .filter(|request| request.url.path() == "/api/posture/stats/")
        .count();
    assert_eq!(stats_calls, 2);
}

#[tokio::test]
async fn failed_refresh_clears_credentials_and_publishes_unauthenticated() {
    let server = MockServer::start().await;
    mount_stats(&server, "stale", 401).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh/"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Token is blacklisted"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let credentials = stored("stale", "refresh-1");
    let pipeline = pipeline_for(&server, credentials.clone());
    let mut auth_state = pipeline.auth_state();
    assert_eq!(*auth_state.borrow(), AuthState::Authenticated);

    let result = pipeline.send(&ApiRequest::get("posture/stats/")).await;

    assert!(matches!(result, Err(PostureAgentError::AuthFailed(_))));
    assert!(credentials.access_token().is_none());
    assert!(credentials.refresh_token().is_none());
    auth_state.changed().await.unwrap();
    assert_eq!(*auth_state.borrow(), AuthState::Unauthenticated);
}

#[tokio::test]
async fn rejection_without_refresh_token_skips_refresh() {
    let server = MockServer::start().await;
    mount_stats(&server, "stale", 401).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let credentials = Arc::new(MemoryCredentialStore::new());
    credentials
        .update_access("stale".to_string(), None)
        .unwrap();
    let pipeline = pipeline_for(&server, credentials);

    let result = pipeline.send(&ApiRequest::get("posture/stats/")).await;
    assert_eq!(
        result,
        Err(PostureAgentError::AuthFailed(
            "Token is invalid or expired".to_string()
        ))
    );
}

#[tokio::test]
async fn non_auth_errors_are_returned_without_retry() {
    let server = MockServer::start().await;
    mount_stats(&server, "access-1", 500).await;

    let pipeline = pipeline_for(&server, stored("access-1", "refresh-1"));
    let response = pipeline
        .send(&ApiRequest::get("posture/stats/"))
        .await
        .unwrap();
    assert_eq!(response.status, 500);

    let result = pipeline
        .send_json::<Value>(&ApiRequest::get("posture/stats/"))
        .await;
    assert!(matches!(
        result,
        Err(PostureAgentError::Api { status: 500, .. })
    ));
}
