//! Circuit breaker integration tests over real sockets.

mod common;

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{client, mint_jwt, service, spawn_gateway, start_programmable_backend, test_config};

use api_gateway::config::AuthModeConfig;

#[tokio::test]
async fn breaker_opens_after_threshold_and_short_circuits() {
    let calls = Arc::new(AtomicUsize::new(0));
    let backend_calls = calls.clone();
    let backend = start_programmable_backend(move || {
        let calls = backend_calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            (500, r#"{"error":"boom"}"#.to_string())
        }
    })
    .await;

    let mut config = test_config();
    config.breaker.failure_threshold = 3;
    config.breaker.cooldown_secs = 30;
    config.services.push(service("svc-a", "/api/svc-a", backend));

    let (addr, _shutdown) = spawn_gateway(config).await;
    let client = client();

    // Three failures pass through to the backend.
    for _ in 0..3 {
        let resp = client
            .get(format!("http://{addr}/api/svc-a/items"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Breaker is now open: requests are rejected locally.
    for _ in 0..5 {
        let resp = client
            .get(format!("http://{addr}/api/svc-a/items"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 503);
        assert!(resp.headers().contains_key("retry-after"));

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Service Unavailable");
        assert_eq!(body["service"], "svc-a");
        assert!(body["retryAfter"].as_u64().unwrap() >= 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3, "open breaker must not reach backend");
}

#[tokio::test]
async fn half_open_probe_closes_breaker_on_success() {
    // Fail the first `fail_count` calls, then recover.
    let fail_remaining = Arc::new(AtomicU32::new(2));
    let calls = Arc::new(AtomicUsize::new(0));
    let backend_fail = fail_remaining.clone();
    let backend_calls = calls.clone();
    let backend = start_programmable_backend(move || {
        let fail_remaining = backend_fail.clone();
        let calls = backend_calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if fail_remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                (502, "bad gateway".to_string())
            } else {
                (200, r#"{"ok":true}"#.to_string())
            }
        }
    })
    .await;

    let mut config = test_config();
    config.breaker.failure_threshold = 2;
    config.breaker.cooldown_secs = 1;
    config.services.push(service("svc-b", "/api/svc-b", backend));

    let (addr, _shutdown) = spawn_gateway(config).await;
    let client = client();

    for _ in 0..2 {
        let resp = client
            .get(format!("http://{addr}/api/svc-b/ping"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);
    }

    // Open: immediate rejection without a backend call.
    let resp = client
        .get(format!("http://{addr}/api/svc-b/ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // After the cooldown the single probe goes through and succeeds.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let resp = client
        .get(format!("http://{addr}/api/svc-b/ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Closed again: traffic flows normally.
    let resp = client
        .get(format!("http://{addr}/api/svc-b/ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn probe_failure_reopens_breaker() {
    let calls = Arc::new(AtomicUsize::new(0));
    let backend_calls = calls.clone();
    let backend = start_programmable_backend(move || {
        let calls = backend_calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            (500, "still broken".to_string())
        }
    })
    .await;

    let mut config = test_config();
    config.breaker.failure_threshold = 2;
    config.breaker.cooldown_secs = 1;
    config.services.push(service("svc-c", "/api/svc-c", backend));

    let (addr, _shutdown) = spawn_gateway(config).await;
    let client = client();

    for _ in 0..2 {
        client
            .get(format!("http://{addr}/api/svc-c/x"))
            .send()
            .await
            .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    // The probe fails and the breaker reopens for a full cooldown.
    let resp = client
        .get(format!("http://{addr}/api/svc-c/x"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let resp = client
        .get(format!("http://{addr}/api/svc-c/x"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn auth_rejected_probe_frees_the_slot_for_recovery() {
    // Fail once, then recover.
    let fail_remaining = Arc::new(AtomicU32::new(1));
    let calls = Arc::new(AtomicUsize::new(0));
    let backend_fail = fail_remaining.clone();
    let backend_calls = calls.clone();
    let backend = start_programmable_backend(move || {
        let fail_remaining = backend_fail.clone();
        let calls = backend_calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if fail_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                (500, "boom".to_string())
            } else {
                (200, r#"{"ok":true}"#.to_string())
            }
        }
    })
    .await;

    let mut config = test_config();
    config.breaker.failure_threshold = 1;
    config.breaker.cooldown_secs = 1;
    let mut svc = service("svc-auth", "/api/svc-auth", backend);
    svc.auth_mode = AuthModeConfig::Jwt;
    config.services.push(svc);

    let (addr, _shutdown) = spawn_gateway(config).await;
    let client = client();
    let url = format!("http://{addr}/api/svc-auth/x");
    let token = mint_jwt("integration-secret", 3600);

    // Trip the breaker with one authorized failure.
    let resp = client.get(&url).bearer_auth(&token).send().await.unwrap();
    assert_eq!(resp.status(), 500);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    // An unauthenticated request takes the probe slot and dies at the auth
    // stage; the slot must come back rather than wedge the breaker.
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The next authorized request becomes the probe and closes the breaker.
    let resp = client.get(&url).bearer_auth(&token).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let resp = client.get(&url).bearer_auth(&token).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unreachable_backend_counts_as_failure() {
    // Point at a port nothing listens on.
    let mut config = test_config();
    config.breaker.failure_threshold = 2;
    config.services.push(service(
        "svc-dead",
        "/api/dead",
        "127.0.0.1:1".parse().unwrap(),
    ));

    let (addr, _shutdown) = spawn_gateway(config).await;
    let client = client();

    for _ in 0..2 {
        let resp = client
            .get(format!("http://{addr}/api/dead/x"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 503);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["service"], "svc-dead");
    }

    // Breaker is open now; still 503 but without a connect attempt.
    let resp = client
        .get(format!("http://{addr}/api/dead/x"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
}
