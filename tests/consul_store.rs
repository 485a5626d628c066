//! Integration tests for the catalog store chain against a stub
//! upstream speaking the Consul HTTP API.

mod common;

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use glimpse_dns::consul::ConsulStore;
use glimpse_dns::logging::LoggingStore;
use glimpse_dns::metrics::MetricsStore;
use glimpse_dns::name::parse_identity;
use glimpse_dns::{ErrorKind, Identity, Store, UpstreamConfig};

async fn serve_stub(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn store_for(addr: SocketAddr) -> impl Store {
    let config = UpstreamConfig {
        addr: addr.to_string(),
        info: "consul info".to_string(),
        zone: "gg".to_string(),
    };
    LoggingStore::new(MetricsStore::new(ConsulStore::new(&config).unwrap()))
}

fn service_entry(identity: &Identity, port: u16, host: &str, ip: &str, checks: &[&str]) -> Value {
    json!({
        "Node": {"Node": host, "Address": ip},
        "Service": {
            "ID": format!("{}-{}-{}", identity.product, identity.job, port),
            "Service": identity.product,
            "Tags": identity.to_tags(),
            "Port": port,
        },
        "Checks": checks.iter().map(|s| json!({"Status": s})).collect::<Vec<_>>(),
    })
}

fn health_stub(identity: &Identity, entries: Vec<Value>) -> Router {
    Router::new().route(
        &format!("/v1/health/service/{}", identity.product),
        get(move || {
            let entries = entries.clone();
            async move { Json(Value::Array(entries)) }
        }),
    )
}

#[tokio::test]
async fn get_instances_returns_tagged_entries() {
    let identity = parse_identity("http.walker.qa.roshi.gg").unwrap();
    let entries = vec![service_entry(
        &identity,
        8080,
        "host00.gg.local",
        "10.2.3.4",
        &[],
    )];

    let addr = serve_stub(health_stub(&identity, entries)).await;
    let store = store_for(addr);

    let instances = store.get_instances(&identity).await.unwrap();
    assert_eq!(1, instances.len());
    assert_eq!("host00.gg.local", instances[0].host);
    assert_eq!("10.2.3.4".parse::<std::net::Ipv4Addr>().unwrap(), instances[0].ip);
    assert_eq!(8080, instances[0].port);
}

#[tokio::test]
async fn get_instances_drops_failing_checks() {
    let identity = parse_identity("xmpp.chat.prod.fire.gg").unwrap();
    let entries = vec![
        service_entry(&identity, 9090, "host02.gg.local", "10.3.4.5", &["passing"]),
        service_entry(&identity, 9091, "host02.gg.local", "10.3.4.5", &[]),
        service_entry(
            &identity,
            9092,
            "host02.gg.local",
            "10.3.4.5",
            &["passing", "critical"],
        ),
    ];

    let addr = serve_stub(health_stub(&identity, entries)).await;
    let store = store_for(addr);

    let instances = store.get_instances(&identity).await.unwrap();
    assert_eq!(2, instances.len());
}

#[tokio::test]
async fn get_instances_requires_matching_tags() {
    let identity = parse_identity("http.walker.qa.roshi.gg").unwrap();
    // Same product, different env and service.
    let other = parse_identity("https.walker.prod.roshi.gg").unwrap();
    let entries = vec![service_entry(&other, 8080, "host00.gg.local", "10.2.3.4", &[])];

    let addr = serve_stub(health_stub(&identity, entries)).await;
    let store = store_for(addr);

    let err = store.get_instances(&identity).await.unwrap_err();
    assert_eq!(ErrorKind::NoInstances, err.kind());
}

#[tokio::test]
async fn get_instances_rejects_invalid_ip() {
    let identity = parse_identity("prometheus.walker.qa.roshi.gg").unwrap();
    let entries = vec![service_entry(&identity, 8081, "host01.gg.local", "3.2.1", &[])];

    let addr = serve_stub(health_stub(&identity, entries)).await;
    let store = store_for(addr);

    let err = store.get_instances(&identity).await.unwrap_err();
    assert_eq!(ErrorKind::InvalidIp, err.kind());
}

#[tokio::test]
async fn get_instances_empty_result_is_no_instances() {
    let identity = parse_identity("predict.future.experimental.oracle.gg").unwrap();

    let addr = serve_stub(health_stub(&identity, vec![])).await;
    let store = store_for(addr);

    let err = store.get_instances(&identity).await.unwrap_err();
    assert_eq!(ErrorKind::NoInstances, err.kind());
}

#[tokio::test]
async fn get_instances_unknown_zone_is_no_instances() {
    let identity = parse_identity("http.walker.qa.roshi.zz").unwrap();

    let app = Router::new().route(
        &format!("/v1/health/service/{}", identity.product),
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "No path to datacenter: zz") }),
    );
    let addr = serve_stub(app).await;
    let store = store_for(addr);

    let err = store.get_instances(&identity).await.unwrap_err();
    assert_eq!(ErrorKind::NoInstances, err.kind());
}

#[tokio::test]
async fn get_instances_unreachable_upstream() {
    let identity = parse_identity("amqp.broker.qa.solution.gg").unwrap();

    // Nothing listens on port 1.
    let config = UpstreamConfig {
        addr: "127.0.0.1:1".to_string(),
        info: "consul info".to_string(),
        zone: "gg".to_string(),
    };
    let store = LoggingStore::new(MetricsStore::new(ConsulStore::new(&config).unwrap()));

    let err = store.get_instances(&identity).await.unwrap_err();
    assert_eq!(ErrorKind::CatalogUnreachable, err.kind());
}

fn members_stub(members: Vec<Value>) -> Router {
    Router::new().route(
        "/v1/agent/members",
        get(move || {
            let members = members.clone();
            async move { Json(Value::Array(members)) }
        }),
    )
}

#[tokio::test]
async fn get_servers_filters_and_strips_zone() {
    let members = vec![
        json!({"Name": "foo.tt", "Addr": "10.0.0.1", "Port": 8301}),
        json!({"Name": "bar.qq", "Addr": "10.0.0.2", "Port": 8301}),
    ];

    let addr = serve_stub(members_stub(members)).await;
    let store = store_for(addr);

    let servers = store.get_servers("tt").await.unwrap();
    assert_eq!(1, servers.len());
    assert_eq!("foo", servers[0].host);
    assert_eq!("10.0.0.1".parse::<std::net::Ipv4Addr>().unwrap(), servers[0].ip);
    assert_eq!(0, servers[0].port);
}

#[tokio::test]
async fn get_servers_empty_zone_returns_all() {
    let members = vec![
        json!({"Name": "foo.tt", "Addr": "10.0.0.1", "Port": 8301}),
        json!({"Name": "bar.qq", "Addr": "10.0.0.2", "Port": 8301}),
    ];

    let addr = serve_stub(members_stub(members)).await;
    let store = store_for(addr);

    let mut servers = store.get_servers("").await.unwrap();
    servers.sort_by(|a, b| a.host.cmp(&b.host));
    assert_eq!(2, servers.len());
    assert_eq!("bar", servers[0].host);
    assert_eq!("foo", servers[1].host);
}

#[tokio::test]
async fn get_servers_skips_members_with_unparsable_addresses() {
    let members = vec![
        json!({"Name": "foo.tt", "Addr": "10.0.0.1", "Port": 8301}),
        json!({"Name": "baz.tt", "Addr": "not-an-ip", "Port": 8301}),
        json!({"Name": "bar.tt", "Addr": "10.0.0.3", "Port": 8301}),
    ];

    let addr = serve_stub(members_stub(members)).await;
    let store = store_for(addr);

    let mut servers = store.get_servers("tt").await.unwrap();
    servers.sort_by(|a, b| a.host.cmp(&b.host));

    let hosts: Vec<&str> = servers.iter().map(|s| s.host.as_str()).collect();
    assert_eq!(vec!["bar", "foo"], hosts);
}

#[tokio::test]
async fn get_servers_unknown_zone_is_no_instances() {
    let members = vec![json!({"Name": "foo.tt", "Addr": "10.0.0.1", "Port": 8301})];

    let addr = serve_stub(members_stub(members)).await;
    let store = store_for(addr);

    let err = store.get_servers("zz").await.unwrap_err();
    assert_eq!(ErrorKind::NoInstances, err.kind());
}
