//! HTTP-level registry behavior, driven through a real listener.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use gorpc_registry::{
    heartbeat, Registry, DEFAULT_REGISTRY_PATH, REGISTRY_SERVERS_HEADER, REGISTRY_SERVER_HEADER,
};

async fn start_registry(timeout: Duration) -> String {
    let registry = Arc::new(Registry::new(timeout));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(registry.serve(listener, DEFAULT_REGISTRY_PATH));
    format!("http://{addr}{DEFAULT_REGISTRY_PATH}")
}

fn servers_from(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get(REGISTRY_SERVERS_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(String::from)
        .collect()
}

#[tokio::test]
async fn members_age_out_by_heartbeat() {
    let url = start_registry(Duration::from_millis(300)).await;
    let http = reqwest::Client::new();

    let response = http
        .post(&url)
        .header(REGISTRY_SERVER_HEADER, "tcp@127.0.0.1:7001")
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let response = http.get(&url).send().await.unwrap();
    assert_eq!(servers_from(&response), vec!["tcp@127.0.0.1:7001"]);

    // No further heartbeats: past the timeout the member is gone.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let response = http.get(&url).send().await.unwrap();
    assert!(servers_from(&response).is_empty());
}

#[tokio::test]
async fn alive_list_is_sorted_and_comma_joined() {
    let url = start_registry(Duration::from_secs(10)).await;
    let http = reqwest::Client::new();

    for addr in ["tcp@127.0.0.1:7002", "tcp@127.0.0.1:7001"] {
        http.post(&url)
            .header(REGISTRY_SERVER_HEADER, addr)
            .send()
            .await
            .unwrap();
    }

    let response = http.get(&url).send().await.unwrap();
    let raw = response
        .headers()
        .get(REGISTRY_SERVERS_HEADER)
        .unwrap()
        .to_str()
        .unwrap();
    assert_eq!(raw, "tcp@127.0.0.1:7001,tcp@127.0.0.1:7002");
}

#[tokio::test]
async fn post_without_member_header_is_rejected() {
    let url = start_registry(Duration::from_secs(10)).await;
    let response = reqwest::Client::new().post(&url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn other_methods_are_not_allowed() {
    let url = start_registry(Duration::from_secs(10)).await;
    let response = reqwest::Client::new().put(&url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let url = start_registry(Duration::from_secs(10)).await;
    let elsewhere = url.replace(DEFAULT_REGISTRY_PATH, "/elsewhere");
    let response = reqwest::Client::new().get(&elsewhere).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn heartbeat_helper_keeps_a_member_alive() {
    let url = start_registry(Duration::from_millis(400)).await;

    let beat = heartbeat(
        url.clone(),
        "tcp@127.0.0.1:7002".to_string(),
        Duration::from_millis(100),
    );

    // Well past the registry timeout, the periodic heartbeat keeps the
    // member listed.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let response = reqwest::Client::new().get(&url).send().await.unwrap();
    assert_eq!(servers_from(&response), vec!["tcp@127.0.0.1:7002"]);

    beat.abort();
}
