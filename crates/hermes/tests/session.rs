//! End-to-end sessions over IPC: barrier, data plane, control plane, kill.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use hermes::device::{Capture, DeviceAdapter, PassthroughDevice, SyntheticDevice};
use hermes::node::{Consumer, NodeContext, NodeState, Producer};
use hermes::stream::experiment::{ACTIVITY_STREAM, EXPERIMENT_DEVICE};
use hermes::{ExperimentController, EventOutcome, NodeError, UiEvent};
use hermesconf::HermesConfig;
use hermesproto::{
    BarrierHost, DataType, KillSwitch, NodeEndpoints, PeerEndpoints, SampleBatch, SampleData,
    SampleFrame, StreamDescriptor, ToggleState, ZmqContext,
};
use pretty_assertions::assert_eq;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn session_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("/tmp/hermes-test-{}", &id[..8])
}

/// Endpoints for one node of a session; every node shares the session's sync endpoint.
fn node_endpoints(session: &str, role: &str) -> NodeEndpoints {
    let mut endpoints = NodeEndpoints::ipc(&format!("{}-{}", session, role));
    endpoints.sync = format!("ipc://{}-sync", session);
    endpoints
}

fn spawn_barrier(session: &str, quorum: usize) -> tokio::task::JoinHandle<Vec<String>> {
    let host = BarrierHost::new(format!("ipc://{}-sync", session), quorum, WAIT);
    tokio::spawn(async move {
        let ctx = ZmqContext::new();
        host.serve(&ctx).await.unwrap().released
    })
}

async fn kill(endpoints: &NodeEndpoints, peer: &str) {
    let ctx = ZmqContext::new();
    KillSwitch::connect(&ctx, &endpoints.killsig, peer)
        .unwrap()
        .kill(WAIT)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_synthetic_samples_reach_consumer() {
    let session = session_id();
    let producer_ep = node_endpoints(&session, "imu").without_pause();
    let consumer_ep = node_endpoints(&session, "viewer").without_pause();
    let barrier = spawn_barrier(&session, 2);

    let device = SyntheticDevice::new("imu", 200.0, 2);
    let descriptors = device.descriptors();

    let producer = Producer::new(NodeContext::default(), device)
        .with_name("imu")
        .with_endpoints(producer_ep.clone());
    let producer_reader = producer.reader();
    let mut producer_state = producer.state_watch();

    let consumer = Consumer::new(NodeContext::default(), descriptors.clone())
        .with_name("viewer")
        .with_endpoints(consumer_ep.clone())
        .with_feeds(vec![producer_ep.publish.clone()]);
    let replica = consumer.reader();
    let mut consumer_state = consumer.state_watch();

    let producer_task = tokio::spawn(producer.run());
    let consumer_task = tokio::spawn(consumer.run());

    timeout(WAIT, producer_state.wait_for(NodeState::Running)).await.unwrap();
    timeout(WAIT, consumer_state.wait_for(NodeState::Running)).await.unwrap();

    // the first samples may be lost while the subscription settles
    timeout(WAIT, async {
        while replica.record_count("imu", "counter").unwrap() < 10 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    kill(&producer_ep, "imu").await;
    kill(&consumer_ep, "viewer").await;

    let produced = producer_task.await.unwrap().unwrap();
    let mirrored = consumer_task.await.unwrap().unwrap();
    assert!(produced.killed);
    assert!(mirrored.killed);
    assert_eq!(mirrored.discarded, 0);
    assert!(mirrored.received <= produced.appended);

    assert_eq!(replica.descriptors(), producer_reader.descriptors());
    let mut released = barrier.await.unwrap();
    released.sort();
    assert_eq!(released, vec!["imu", "viewer"]);

    // every mirrored record is the producer's record with the same counter value
    let source = producer_reader.get_data("imu", "counter", 0).unwrap().unwrap();
    let mirror = replica.get_data("imu", "counter", 0).unwrap().unwrap();
    for (time_s, data) in mirror.time_s.iter().zip(&mirror.data) {
        let i = source
            .data
            .iter()
            .position(|d| d == data)
            .expect("mirrored counter missing from source");
        assert_eq!(source.time_s[i], *time_s);
    }
}

#[tokio::test]
async fn test_consumer_discards_malformed_frames() {
    let session = session_id();
    let consumer_ep = node_endpoints(&session, "viewer").without_pause();
    let feed = format!("ipc://{}-feed", session);
    let barrier = spawn_barrier(&session, 1);

    let zmq = ZmqContext::new();
    let mut publisher = tmq::publish(&zmq).set_linger(0).bind(&feed).unwrap();

    let desc = StreamDescriptor::new("imu", "temp", DataType::Int16, vec![1], 10.0);
    let consumer = Consumer::new(NodeContext::default(), vec![desc])
        .with_endpoints(consumer_ep.clone())
        .with_feeds(vec![feed]);
    let replica = consumer.reader();
    let mut state = consumer.state_watch();
    let task = tokio::spawn(consumer.run());
    timeout(WAIT, state.wait_for(NodeState::Running)).await.unwrap();

    let unknown = SampleFrame::new("imu", 1.0).with_stream("humidity", SampleData::Int(vec![40]));
    let good = SampleFrame::new("imu", 1.0).with_stream("temp", SampleData::Int(vec![21]));

    // per-connection order holds, so once a good frame lands the two bad
    // frames sent ahead of it have been seen too
    timeout(WAIT, async {
        while replica.record_count("imu", "temp").unwrap() == 0 {
            let garbage: tmq::Multipart = vec![b"imu".to_vec()].into();
            publisher.send(garbage).await.unwrap();
            publisher.send(unknown.to_multipart().unwrap()).await.unwrap();
            publisher.send(good.to_multipart().unwrap()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    kill(&consumer_ep, "viewer").await;
    let report = task.await.unwrap().unwrap();
    assert!(report.received >= 1);
    assert!(report.discarded >= 2);
    barrier.await.unwrap();
}

#[tokio::test]
async fn test_consumer_drops_partly_unknown_frame_whole() {
    let session = session_id();
    let consumer_ep = node_endpoints(&session, "viewer").without_pause();
    let feed = format!("ipc://{}-feed", session);
    let barrier = spawn_barrier(&session, 1);

    let zmq = ZmqContext::new();
    let mut publisher = tmq::publish(&zmq).set_linger(0).bind(&feed).unwrap();

    let desc = StreamDescriptor::new("imu", "temp", DataType::Int16, vec![1], 10.0);
    let consumer = Consumer::new(NodeContext::default(), vec![desc])
        .with_endpoints(consumer_ep.clone())
        .with_feeds(vec![feed]);
    let replica = consumer.reader();
    let mut state = consumer.state_watch();
    let task = tokio::spawn(consumer.run());
    timeout(WAIT, state.wait_for(NodeState::Running)).await.unwrap();

    // temp alone would fit, humidity was never registered
    let mixed = SampleFrame::new("imu", 1.0)
        .with_stream("temp", SampleData::Int(vec![99]))
        .with_stream("humidity", SampleData::Int(vec![40]));
    let good = SampleFrame::new("imu", 2.0).with_stream("temp", SampleData::Int(vec![21]));

    timeout(WAIT, async {
        while replica.record_count("imu", "temp").unwrap() == 0 {
            publisher.send(mixed.to_multipart().unwrap()).await.unwrap();
            publisher.send(good.to_multipart().unwrap()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    kill(&consumer_ep, "viewer").await;
    let report = task.await.unwrap().unwrap();
    assert!(report.discarded >= 1);
    assert!(report.received >= 1);

    let mirrored = replica.get_data("imu", "temp", 0).unwrap().unwrap();
    assert!(mirrored.data.iter().all(|d| *d == SampleData::Int(vec![21])));
    assert!(mirrored.time_s.iter().all(|t| *t == 2.0));
    barrier.await.unwrap();
}

#[tokio::test]
async fn test_kill_reply_follows_cleanup() {
    let session = session_id();
    let endpoints = node_endpoints(&session, "node").without_pause();
    let barrier = spawn_barrier(&session, 1);

    let cleaned = Arc::new(AtomicBool::new(false));
    let marker = cleaned.clone();
    let (device, _events) = PassthroughDevice::new("dev", Vec::new());
    let producer = Producer::new(NodeContext::default(), device)
        .with_endpoints(endpoints.clone())
        .on_cleanup(move || marker.store(true, Ordering::SeqCst));
    let mut state = producer.state_watch();
    let task = tokio::spawn(producer.run());

    timeout(WAIT, state.wait_for(NodeState::Running)).await.unwrap();
    assert!(!cleaned.load(Ordering::SeqCst));

    kill(&endpoints, "node").await;
    assert!(cleaned.load(Ordering::SeqCst));
    assert_eq!(state.current(), NodeState::Terminated);

    assert!(task.await.unwrap().unwrap().killed);
    barrier.await.unwrap();
}

#[tokio::test]
async fn test_consumer_sync_timeout() {
    let session = session_id();
    let mut config = HermesConfig::default();
    config.session.sync.timeout_ms = 100;

    let consumer = Consumer::new(NodeContext::new(config), Vec::new())
        .with_endpoints(node_endpoints(&session, "viewer").without_pause())
        .with_feeds(vec![format!("ipc://{}-feed", session)]);
    let state = consumer.state_watch();

    let err = consumer.run().await.unwrap_err();
    assert!(matches!(err, NodeError::SyncTimeout { .. }));
    assert_eq!(state.current(), NodeState::Terminated);
}

#[tokio::test]
async fn test_controller_session() {
    let session = session_id();
    let imu_ep = node_endpoints(&session, "imu");
    let ctl_ep = node_endpoints(&session, "ctl").without_pause();
    let barrier = spawn_barrier(&session, 2);

    let imu_cleaned = Arc::new(AtomicBool::new(false));
    let marker = imu_cleaned.clone();
    let imu = Producer::new(NodeContext::default(), SyntheticDevice::new("imu", 100.0, 1))
        .with_name("imu")
        .with_endpoints(imu_ep.clone())
        .on_cleanup(move || marker.store(true, Ordering::SeqCst));
    let imu_pause = imu.pause_toggle();
    let mut imu_state = imu.state_watch();
    let imu_task = tokio::spawn(imu.run());

    let mut config = HermesConfig::default();
    config.session.activities = ["walk", "sit", "stand", "turn"].map(String::from).to_vec();
    let controller = ExperimentController::new(NodeContext::new(config))
        .with_name("controller")
        .with_endpoints(ctl_ep)
        .with_peers(vec![PeerEndpoints::for_node("imu", &imu_ep)]);
    let activity = controller.reader();
    let mut ctl_state = controller.state_watch();
    let (handle, ctl_task) = controller.start();

    timeout(WAIT, imu_state.wait_for(NodeState::Running)).await.unwrap();
    timeout(WAIT, ctl_state.wait_for(NodeState::Running)).await.unwrap();

    handle.mark_activity("walk").await.unwrap();
    let outcome = handle
        .handle_event(UiEvent::MarkActivity("sit".into()))
        .await
        .unwrap();
    assert!(matches!(outcome, EventOutcome::Marked { ref label, .. } if label == "sit"));

    let toggles = [
        handle.toggle_pause("imu").await.unwrap(),
        handle.toggle_pause("imu").await.unwrap(),
        handle.toggle_pause("imu").await.unwrap(),
    ];
    assert_eq!(toggles, [ToggleState::Paused, ToggleState::On, ToggleState::Paused]);
    assert!(imu_pause.state().is_paused());

    timeout(WAIT, async {
        while activity.record_count(EXPERIMENT_DEVICE, ACTIVITY_STREAM).unwrap() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let outcome = handle.handle_event(UiEvent::StopExperiment).await.unwrap();
    let EventOutcome::Stopped(report) = outcome else {
        panic!("expected a stop report, got {:?}", outcome);
    };
    assert_eq!(report.terminated, vec!["imu"]);
    assert!(report.failed.is_empty());
    assert!(imu_cleaned.load(Ordering::SeqCst));

    assert!(imu_task.await.unwrap().unwrap().killed);
    let ctl_report = ctl_task.await.unwrap().unwrap();
    assert_eq!(ctl_report.appended, 2);
    assert!(!ctl_report.killed);

    let last = activity
        .get_data(EXPERIMENT_DEVICE, ACTIVITY_STREAM, -1)
        .unwrap()
        .unwrap();
    assert_eq!(last.data, vec![SampleData::text("sit")]);
    let all = activity
        .get_data(EXPERIMENT_DEVICE, ACTIVITY_STREAM, 0)
        .unwrap()
        .unwrap();
    assert_eq!(all.data, vec![SampleData::text("walk"), SampleData::text("sit")]);
    assert!(all.time_s[0] <= all.time_s[1]);

    assert_eq!(barrier.await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_stop_reports_unreachable_peer() {
    let session = session_id();
    let barrier = spawn_barrier(&session, 1);

    let mut config = HermesConfig::default();
    config.session.activities = vec!["walk".into()];
    config.session.control.request_timeout_ms = 100;
    let controller = ExperimentController::new(NodeContext::new(config))
        .with_endpoints(node_endpoints(&session, "ctl").without_pause())
        .with_peers(vec![PeerEndpoints {
            name: "ghost".into(),
            killsig: format!("ipc://{}-ghost-kill", session),
            pause: None,
        }]);
    let mut state = controller.state_watch();
    let (handle, task) = controller.start();
    timeout(WAIT, state.wait_for(NodeState::Running)).await.unwrap();

    let report = handle.stop_experiment().await;
    assert!(report.terminated.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "ghost");

    task.await.unwrap().unwrap();
    barrier.await.unwrap();
}

#[tokio::test]
async fn test_passthrough_capture_is_appended() {
    let session = session_id();
    let endpoints = node_endpoints(&session, "dev").without_pause();
    let barrier = spawn_barrier(&session, 1);

    let desc = StreamDescriptor::new("dev", "button", DataType::Bool, vec![1], 0.0);
    let (device, events) = PassthroughDevice::new("dev", vec![desc]);
    let producer = Producer::new(NodeContext::default(), device).with_endpoints(endpoints.clone());
    let reader = producer.reader();
    let mut state = producer.state_watch();
    let task = tokio::spawn(producer.run());

    // streams are registered during Initializing
    timeout(WAIT, state.wait_for(NodeState::Running)).await.unwrap();
    assert_eq!(reader.record_count("dev", "button").unwrap(), 0);

    let batch = SampleBatch::new().with("dev", "button", SampleData::Bool(vec![true]));
    events.send(Capture::new(3.0, batch)).await.unwrap();

    timeout(WAIT, async {
        while reader.record_count("dev", "button").unwrap() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    kill(&endpoints, "dev").await;
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.appended, 1);
    assert_eq!(report.published, 1);
    barrier.await.unwrap();
}
