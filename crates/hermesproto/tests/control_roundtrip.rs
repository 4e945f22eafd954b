//! Integration tests for the control plane: pause toggle, kill handshake,
//! sync barrier. Each test binds unique ipc:// endpoints.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hermesproto::{
    register, BarrierHost, ControlClient, ControlResponder, KillListener, KillSwitch,
    PauseToggle, SyncError, ToggleState, ZmqContext,
};
use tokio_util::sync::CancellationToken;

fn unique_endpoint(role: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_string();
    format!("ipc:///tmp/hermes-test-{}-{}", id, role)
}

#[tokio::test]
async fn test_toggle_is_two_cycle() {
    let ctx = ZmqContext::new();
    let endpoint = unique_endpoint("pause");

    let toggle = Arc::new(PauseToggle::new());
    let responder = ControlResponder::bind(&ctx, &endpoint, "pause").unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(responder.serve(toggle.clone(), shutdown.clone()));

    let mut client = ControlClient::connect(&ctx, &endpoint, "pause").unwrap();
    let timeout = Duration::from_secs(2);

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(client.toggle(timeout).await.unwrap());
    }
    assert_eq!(
        seen,
        vec![ToggleState::Paused, ToggleState::On, ToggleState::Paused]
    );
    assert_eq!(toggle.state(), ToggleState::Paused);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_request_to_absent_peer_times_out() {
    let ctx = ZmqContext::new();
    let endpoint = unique_endpoint("absent");
    let mut client = ControlClient::connect(&ctx, &endpoint, "absent").unwrap();

    let started = Instant::now();
    let err = client
        .request("OK", Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(2));

    // The client recovers once the peer shows up
    let responder = ControlResponder::bind(&ctx, &endpoint, "absent").unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(responder.serve(Arc::new(PauseToggle::new()), shutdown.clone()));

    let state = client.toggle(Duration::from_secs(2)).await.unwrap();
    assert_eq!(state, ToggleState::Paused);

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), server).await;
}

#[tokio::test]
async fn test_kill_reply_follows_cleanup() {
    let ctx = ZmqContext::new();
    let endpoint = unique_endpoint("kill");
    let cleaned_up = Arc::new(AtomicBool::new(false));

    let listener = KillListener::bind(&ctx, &endpoint).unwrap();
    let marker = cleaned_up.clone();
    let node = tokio::spawn(async move {
        let request = listener.recv().await.unwrap();
        // Slow cleanup: the controller must still be waiting afterwards
        tokio::time::sleep(Duration::from_millis(150)).await;
        marker.store(true, Ordering::SeqCst);
        request.acknowledge().await.unwrap();
    });

    let switch = KillSwitch::connect(&ctx, &endpoint, "eye").unwrap();
    switch.kill(Duration::from_secs(2)).await.unwrap();
    assert!(cleaned_up.load(Ordering::SeqCst));

    tokio::time::timeout(Duration::from_secs(1), node)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_kill_unreachable_peer_times_out() {
    let ctx = ZmqContext::new();
    let switch = KillSwitch::connect(&ctx, &unique_endpoint("nobody"), "ghost").unwrap();
    let err = switch.kill(Duration::from_millis(200)).await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_barrier_releases_quorum() {
    let ctx = ZmqContext::new();
    let endpoint = unique_endpoint("sync");
    let host = BarrierHost::new(endpoint.clone(), 2, Duration::from_secs(5));

    let host_ctx = ctx.clone();
    let host_task = tokio::spawn(async move { host.serve(&host_ctx).await });

    let timeout = Duration::from_secs(5);
    let (a, b) = tokio::join!(
        register(&ctx, &endpoint, "eye", timeout),
        register(&ctx, &endpoint, "insoles", timeout),
    );
    a.unwrap();
    b.unwrap();

    let report = host_task.await.unwrap().unwrap();
    let mut released = report.released.clone();
    released.sort();
    assert_eq!(released, vec!["eye", "insoles"]);
}

#[tokio::test]
async fn test_barrier_without_quorum_times_out() {
    let ctx = ZmqContext::new();
    let endpoint = unique_endpoint("sync");
    let host = BarrierHost::new(endpoint.clone(), 2, Duration::from_millis(300));

    let host_ctx = ctx.clone();
    let host_task = tokio::spawn(async move { host.serve(&host_ctx).await });

    let err = register(&ctx, &endpoint, "eye", Duration::from_millis(500))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Timeout { .. }));

    let host_result = host_task.await.unwrap();
    assert!(matches!(host_result, Err(SyncError::Timeout { .. })));
}
