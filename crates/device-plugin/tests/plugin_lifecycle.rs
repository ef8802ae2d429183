mod common;

use std::sync::Arc;
use std::time::Duration;

use common::eventually;
use common::plugin_client;
use common::plugin_config;
use common::FakeKubelet;
use device_plugin::device::DeviceAllocation;
use device_plugin::device::Health;
use device_plugin::device::HealthEvent;
use device_plugin::device::MockDevices;
use device_plugin::plugin::allocation::ENV_VISIBLE_DEVICE_IDS;
use device_plugin::plugin::allocation::ENV_VISIBLE_DEVICE_PATHS;
use device_plugin::plugin::allocation::ENV_VISIBLE_MODULES;
use device_plugin::plugin::api::AllocateRequest;
use device_plugin::plugin::api::ContainerAllocateRequest;
use device_plugin::plugin::api::Empty;
use device_plugin::plugin::api::ListAndWatchResponse;
use device_plugin::plugin::api::PreStartContainerRequest;
use device_plugin::plugin::api::PreferredAllocationRequest;
use device_plugin::plugin::PluginPhase;
use device_plugin::plugin::PluginServer;
use similar_asserts::assert_eq;
use test_log::test;
use tonic::Code;
use tonic::Streaming;

fn health_of(response: &ListAndWatchResponse) -> Vec<(String, String)> {
    response
        .devices
        .iter()
        .map(|d| (d.id.clone(), d.health.clone()))
        .collect()
}

fn pairs(expected: &[(&str, &str)]) -> Vec<(String, String)> {
    expected
        .iter()
        .map(|(id, health)| (id.to_string(), health.to_string()))
        .collect()
}

async fn next(stream: &mut Streaming<ListAndWatchResponse>) -> Option<ListAndWatchResponse> {
    tokio::time::timeout(Duration::from_secs(5), stream.message())
        .await
        .expect("stream message in time")
        .expect("stream healthy")
}

/// Reads updates until one matches `expected`, skipping earlier states.
async fn wait_for(stream: &mut Streaming<ListAndWatchResponse>, expected: &[(&str, &str)]) {
    let expected = pairs(expected);
    loop {
        let response = next(stream).await.expect("stream still open");
        if health_of(&response) == expected {
            return;
        }
    }
}

async fn serving(mock: &MockDevices) -> (tempfile::TempDir, PluginServer) {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let mut server = PluginServer::new(plugin_config(dir.path()), Arc::new(mock.clone()));
    server.start().await.expect("start");
    (dir, server)
}

fn request(containers: &[&[&str]]) -> AllocateRequest {
    AllocateRequest {
        container_requests: containers
            .iter()
            .map(|ids| ContainerAllocateRequest {
                devices_ids: ids.iter().map(|id| id.to_string()).collect(),
            })
            .collect(),
    }
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn list_and_watch_streams_initial_snapshot_and_single_event() {
    let mock = MockDevices::with_ids(&["A", "B"]);
    let (_dir, mut server) = serving(&mock).await;
    let mut client = plugin_client(server.socket_path()).await;

    let mut stream = client
        .list_and_watch(Empty {})
        .await
        .expect("list and watch")
        .into_inner();

    let initial = next(&mut stream).await.expect("initial snapshot");
    assert_eq!(
        health_of(&initial),
        pairs(&[("A", "Healthy"), ("B", "Healthy")])
    );

    mock.emit(HealthEvent::Device("A".to_string()));
    wait_for(&mut stream, &[("A", "Unhealthy"), ("B", "Healthy")]).await;

    server.stop().await.expect("stop");
    let end = tokio::time::timeout(Duration::from_secs(5), stream.message())
        .await
        .expect("stream settles in time");
    assert!(!matches!(end, Ok(Some(_))), "stream ends with the session");
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn wildcard_marks_every_device_unhealthy() {
    let mock = MockDevices::with_ids(&["A", "B"]);
    let (_dir, mut server) = serving(&mock).await;
    let mut client = plugin_client(server.socket_path()).await;
    let mut stream = client
        .list_and_watch(Empty {})
        .await
        .expect("list and watch")
        .into_inner();

    mock.emit(HealthEvent::Wildcard);

    wait_for(&mut stream, &[("A", "Unhealthy"), ("B", "Unhealthy")]).await;
    server.stop().await.expect("stop");
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn health_events_apply_exactly_once_each() {
    let mock = MockDevices::with_ids(&["A", "B", "C"]);
    let (_dir, mut server) = serving(&mock).await;
    let mut client = plugin_client(server.socket_path()).await;
    let mut stream = client
        .list_and_watch(Empty {})
        .await
        .expect("list and watch")
        .into_inner();

    for id in ["C", "B", "C", "ghost"] {
        mock.emit(HealthEvent::Device(id.to_string()));
    }

    wait_for(
        &mut stream,
        &[("A", "Healthy"), ("B", "Unhealthy"), ("C", "Unhealthy")],
    )
    .await;
    let snapshot = server.snapshot().expect("serving");
    assert_eq!(snapshot.get("A").map(|d| d.health), Some(Health::Healthy));
    server.stop().await.expect("stop");
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn every_transition_is_streamed_separately() {
    let ids = ["A", "B", "C", "D", "E"];
    let mock = MockDevices::with_ids(&ids);
    let (_dir, mut server) = serving(&mock).await;
    let mut client = plugin_client(server.socket_path()).await;
    let mut stream = client
        .list_and_watch(Empty {})
        .await
        .expect("list and watch")
        .into_inner();
    let initial = next(&mut stream).await.expect("initial snapshot");
    assert!(initial.devices.iter().all(|d| d.health == "Healthy"));

    mock.emit(HealthEvent::Wildcard);

    let mut unhealthy_counts = Vec::new();
    for _ in 0..ids.len() {
        let update = next(&mut stream).await.expect("one update per transition");
        assert_eq!(update.devices.len(), ids.len());
        unhealthy_counts.push(
            update
                .devices
                .iter()
                .filter(|d| d.health == "Unhealthy")
                .count(),
        );
    }
    assert_eq!(unhealthy_counts, vec![1, 2, 3, 4, 5]);

    let extra = tokio::time::timeout(Duration::from_millis(200), stream.message()).await;
    assert!(extra.is_err(), "no update without a transition");
    server.stop().await.expect("stop");
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn rejected_subscription_reports_device_unhealthy() {
    let mock = MockDevices::with_ids(&["A", "B"]);
    mock.reject_subscription("B");
    let (_dir, mut server) = serving(&mock).await;
    let mut client = plugin_client(server.socket_path()).await;
    let mut stream = client
        .list_and_watch(Empty {})
        .await
        .expect("list and watch")
        .into_inner();

    wait_for(&mut stream, &[("A", "Healthy"), ("B", "Unhealthy")]).await;
    server.stop().await.expect("stop");
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn allocate_single_device_without_module_indices() {
    let mock = MockDevices::with_ids(&["A", "B"]);
    mock.set_allocation(
        "A",
        DeviceAllocation {
            host_paths: vec!["/dev/hl0".to_string(), "/dev/hl_controlD0".to_string()],
            device_index: None,
            module_index: None,
        },
    );
    let (_dir, mut server) = serving(&mock).await;
    let mut client = plugin_client(server.socket_path()).await;

    let response = client
        .allocate(request(&[&["A"]]))
        .await
        .expect("allocate")
        .into_inner();

    assert_eq!(response.container_responses.len(), 1);
    let container = &response.container_responses[0];
    let mut keys: Vec<_> = container.envs.keys().cloned().collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            ENV_VISIBLE_DEVICE_PATHS.to_string(),
            ENV_VISIBLE_DEVICE_IDS.to_string()
        ]
    );
    assert_eq!(container.envs[ENV_VISIBLE_DEVICE_IDS], "A");
    assert_eq!(container.envs[ENV_VISIBLE_DEVICE_PATHS], "/dev/hl0");
    let paths: Vec<_> = container.devices.iter().map(|d| d.host_path.as_str()).collect();
    assert_eq!(paths, vec!["/dev/hl0", "/dev/hl_controlD0"]);
    assert!(container.devices.iter().all(|d| d.permissions == "rw"));

    server.stop().await.expect("stop");
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn allocate_partial_and_full_requests() {
    let mock = MockDevices::with_ids(&["A", "B"]);
    let (_dir, mut server) = serving(&mock).await;
    let mut client = plugin_client(server.socket_path()).await;

    let response = client
        .allocate(request(&[&["B"], &["A", "B"]]))
        .await
        .expect("allocate")
        .into_inner();

    let partial = &response.container_responses[0];
    let full = &response.container_responses[1];
    assert_eq!(partial.envs[ENV_VISIBLE_MODULES], "1");
    assert!(!full.envs.contains_key(ENV_VISIBLE_MODULES));

    server.stop().await.expect("stop");
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn allocate_unknown_device_fails_without_side_effects() {
    let mock = MockDevices::with_ids(&["A", "B"]);
    let (_dir, mut server) = serving(&mock).await;
    let before = server.snapshot().expect("serving");
    let mut client = plugin_client(server.socket_path()).await;

    let status = client
        .allocate(request(&[&["A", "nope"]]))
        .await
        .expect_err("unknown device");

    assert_eq!(status.code(), Code::NotFound);
    assert!(status.message().contains("nope"));
    assert_eq!(server.snapshot().expect("serving"), before);

    server.stop().await.expect("stop");
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn auxiliary_rpcs() {
    let mock = MockDevices::with_ids(&["A"]);
    let (_dir, mut server) = serving(&mock).await;
    let mut client = plugin_client(server.socket_path()).await;

    let options = client
        .get_device_plugin_options(Empty {})
        .await
        .expect("options")
        .into_inner();
    assert_eq!(options, server.options());

    client
        .pre_start_container(PreStartContainerRequest {
            devices_ids: vec!["A".to_string()],
        })
        .await
        .expect("pre start is a no-op");

    let status = client
        .get_preferred_allocation(PreferredAllocationRequest {
            container_requests: Vec::new(),
        })
        .await
        .expect_err("preferred allocation is not offered");
    assert_eq!(status.code(), Code::Unimplemented);

    server.stop().await.expect("stop");
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn restart_keeps_a_single_session() {
    let mock = MockDevices::with_ids(&["A", "B"]);
    let (_dir, mut server) = serving(&mock).await;
    eventually("first subscription", || mock.active_subscriptions() == 1).await;

    server.stop().await.expect("stop");
    assert_eq!(server.phase(), PluginPhase::Idle);
    assert!(!server.socket_path().exists());
    assert_eq!(mock.active_subscriptions(), 0);

    server.start().await.expect("second start");
    eventually("second subscription", || mock.total_subscriptions() == 2).await;
    // Starting while serving tears the old session down first
    server.start().await.expect("third start");

    assert_eq!(server.phase(), PluginPhase::Serving);
    assert!(server.socket_path().exists());
    eventually("latest subscription", || {
        mock.active_subscriptions() == 1 && mock.total_subscriptions() == 3
    })
    .await;

    let mut client = plugin_client(server.socket_path()).await;
    let mut stream = client
        .list_and_watch(Empty {})
        .await
        .expect("list and watch")
        .into_inner();
    wait_for(&mut stream, &[("A", "Healthy"), ("B", "Healthy")]).await;

    server.stop().await.expect("stop");
    assert_eq!(mock.active_subscriptions(), 0);
    assert!(!server.socket_path().exists());
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn restart_resets_health_from_fresh_inventory() {
    let mock = MockDevices::with_ids(&["A"]);
    let (_dir, mut server) = serving(&mock).await;

    mock.emit(HealthEvent::Device("A".to_string()));
    eventually("A unhealthy", || {
        server
            .snapshot()
            .and_then(|s| s.get("A").map(|d| d.health == Health::Unhealthy))
            .unwrap_or(false)
    })
    .await;

    server.start().await.expect("restart");

    let snapshot = server.snapshot().expect("serving");
    assert_eq!(snapshot.get("A").map(|d| d.health), Some(Health::Healthy));
    server.stop().await.expect("stop");
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn serve_registers_socket_basename_with_kubelet() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let config = plugin_config(dir.path());
    let kubelet = FakeKubelet::start(&config.kubelet_socket);
    let mut server = PluginServer::new(config, Arc::new(MockDevices::with_ids(&["A"])));

    server.serve().await.expect("serve");

    let requests = kubelet.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].version, "v1beta1");
    assert_eq!(requests[0].endpoint, common::SOCKET_NAME);
    assert_eq!(requests[0].resource_name, common::RESOURCE);
    assert_eq!(requests[0].options, Some(server.options()));

    server.stop().await.expect("stop");
    kubelet.stop().await;
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn failed_registration_stops_the_session() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let mock = MockDevices::with_ids(&["A"]);
    let mut server = PluginServer::new(plugin_config(dir.path()), Arc::new(mock.clone()));

    let err = server.serve().await.expect_err("kubelet is not running");

    assert_eq!(
        err.current_context(),
        &device_plugin::error::PluginError::Registration
    );
    assert_eq!(server.phase(), PluginPhase::Idle);
    assert!(!server.socket_path().exists());
    assert_eq!(mock.active_subscriptions(), 0);
}
