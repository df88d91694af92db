//! HTTP API tests against a real gateway listener and a scripted
//! coordinator.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coordinator::wire::{PacketBuilder, PacketType};
use coordinator::{CoordinatorClient, ListingSource, ServerListCache};
use gateway::{create_router, AppState, Config};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;

async fn spawn_gateway(config: Config) -> (SocketAddr, watch::Sender<bool>) {
    let coordinator = Arc::new(CoordinatorClient::new(config.coordinator_addr.clone()));
    let cache = Arc::new(ServerListCache::new(
        coordinator.clone() as Arc<dyn ListingSource>,
        config.cache_ttl,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(AppState {
        cache,
        coordinator,
        config: Arc::new(config),
        shutdown: shutdown_rx,
    });
    let app = create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, shutdown_tx)
}

/// Serve every accepted coordinator session with the same scripted
/// responses, counting connections.
async fn scripted_coordinator(responses: Vec<Vec<u8>>) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let responses = responses.clone();
            tokio::spawn(async move {
                let mut request = [0u8; 512];
                let _ = stream.read(&mut request).await;
                for response in &responses {
                    if stream.write_all(response).await.is_err() {
                        return;
                    }
                }
                let mut sink = [0u8; 64];
                let _ = stream.read(&mut sink).await;
            });
        }
    });
    (addr, connections)
}

fn listing_packet(servers: u16) -> Vec<u8> {
    let mut builder = PacketBuilder::new(PacketType::GcListing).write_u16_le(servers);
    for i in 0..servers {
        builder = builder
            .write_zstring(&format!("server{i}.example:3979"))
            .write_u8(1)
            .write_zstring(&format!("Server {i}"))
            .write_zstring("1.10.3")
            .write_u8(0) // language
            .write_u8(0) // password
            .write_u8(25)
            .write_u8(1)
            .write_u8(0)
            .write_bytes(&[0; 4])
            .write_zstring("map")
            .write_u16_le(512)
            .write_u16_le(512)
            .write_u8(0)
            .write_u8(1);
    }
    builder.finish().unwrap()
}

#[tokio::test]
async fn test_health() {
    let (addr, _shutdown) = spawn_gateway(Config::default()).await;

    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (addr, _shutdown) = spawn_gateway(Config::default()).await;

    let response = reqwest::get(format!("http://{addr}/nope")).await.unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "Not Found");
}

#[tokio::test]
async fn test_options_returns_204_with_cors() {
    let (addr, _shutdown) = spawn_gateway(Config::default()).await;

    let client = reqwest::Client::new();
    for path in ["/servers", "/anything/else"] {
        let response = client
            .request(reqwest::Method::OPTIONS, format!("http://{addr}{path}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204, "OPTIONS {path}");
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "*"
        );
    }
}

#[tokio::test]
async fn test_servers_listing_is_cached_and_stable() {
    let (coord_addr, connections) =
        scripted_coordinator(vec![listing_packet(1), listing_packet(0)]).await;

    let mut config = Config::default();
    config.coordinator_addr = coord_addr.to_string();
    config.cache_ttl = Duration::from_secs(60);
    let (addr, _shutdown) = spawn_gateway(config).await;

    let url = format!("http://{addr}/servers");
    let first = reqwest::get(&url).await.unwrap();
    assert_eq!(first.status(), 200);
    let first_body = first.text().await.unwrap();

    let parsed: serde_json::Value = serde_json::from_str(&first_body).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 1);
    assert_eq!(parsed[0]["connection_string"], "server0.example:3979");
    assert_eq!(parsed[0]["name"], "Server 0");
    assert_eq!(parsed[0]["landscape"], "Temperate");
    assert_eq!(parsed[0]["dedicated"], true);
    assert_eq!(parsed[0]["clients_max"], 25);

    let second = reqwest::get(&url).await.unwrap();
    let second_body = second.text().await.unwrap();
    assert_eq!(first_body, second_body);

    // Two requests inside the TTL dial the coordinator once.
    assert_eq!(connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_servers_failure_with_empty_cache_is_500() {
    // Bind-then-drop guarantees a refused coordinator port.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let mut config = Config::default();
    config.coordinator_addr = dead_addr.to_string();
    let (addr, _shutdown) = spawn_gateway(config).await;

    let response = reqwest::get(format!("http://{addr}/servers")).await.unwrap();
    assert_eq!(response.status(), 500);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_resolve_direct() {
    let connecting = PacketBuilder::new(PacketType::GcConnecting)
        .write_zstring("tok")
        .finish()
        .unwrap();
    let direct = PacketBuilder::new(PacketType::GcDirectConnect)
        .write_zstring("tok")
        .write_u8(1)
        .write_zstring("1.2.3.4")
        .write_u16_le(3975)
        .finish()
        .unwrap();
    let (coord_addr, _connections) = scripted_coordinator(vec![connecting, direct]).await;

    let mut config = Config::default();
    config.coordinator_addr = coord_addr.to_string();
    let (addr, _shutdown) = spawn_gateway(config).await;

    let response = reqwest::get(format!("http://{addr}/resolve/%2BABCD"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["type"], "direct");
    assert_eq!(body["hostname"], "1.2.3.4");
    assert_eq!(body["port"], 3975);
    assert!(body.get("ticket").is_none());
}

#[tokio::test]
async fn test_resolve_relay() {
    let stun = PacketBuilder::new(PacketType::GcStunRequest)
        .write_zstring("tok")
        .finish()
        .unwrap();
    let turn = PacketBuilder::new(PacketType::GcTurnConnect)
        .write_zstring("tok")
        .write_u8(1)
        .write_zstring("TKT")
        .write_zstring("relay.example:3974")
        .finish()
        .unwrap();
    let (coord_addr, _connections) = scripted_coordinator(vec![stun, turn]).await;

    let mut config = Config::default();
    config.coordinator_addr = coord_addr.to_string();
    let (addr, _shutdown) = spawn_gateway(config).await;

    let response = reqwest::get(format!("http://{addr}/resolve/ABCD"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["type"], "relay");
    assert_eq!(body["hostname"], "relay.example");
    assert_eq!(body["port"], 3974);
    assert_eq!(body["ticket"], "TKT");
}

#[tokio::test]
async fn test_resolve_coordinator_error_is_500() {
    let error = PacketBuilder::new(PacketType::GcError)
        .write_u8(2)
        .write_zstring("invite code revoked")
        .finish()
        .unwrap();
    let (coord_addr, _connections) = scripted_coordinator(vec![error]).await;

    let mut config = Config::default();
    config.coordinator_addr = coord_addr.to_string();
    let (addr, _shutdown) = spawn_gateway(config).await;

    let response = reqwest::get(format!("http://{addr}/resolve/%2BGONE"))
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("invite code revoked"));
}
