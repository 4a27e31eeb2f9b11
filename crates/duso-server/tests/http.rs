//! End-to-end coverage of the HTTP server over a real socket: a handler
//! script producing a response via `exit(...)`, static file serving, and
//! the longest-prefix routing guarantee exercised through `reqwest`
//! rather than `RouteTable::find` directly — grounded on the teacher's
//! `cli/tests/server.rs` (ping a freshly spawned server) and
//! `cli/tests/util.rs`'s `portpicker::pick_unused_port` idiom for finding
//! a free port up front instead of parsing a bound ephemeral one back out.

use duso_core::{PolicyFlags, Runtime};
use duso_datastore::Registry;
use duso_server::{Method, Server, ServerConfig};
use std::sync::Arc;
use std::time::Duration;

async fn spawn_test_server(routes: impl FnOnce(&Server)) -> String {
    let port = portpicker::pick_unused_port().expect("no free port available");
    let address = format!("127.0.0.1:{port}");

    let registry = Arc::new(Registry::new());
    let runtime = Runtime::new(registry, vec![], PolicyFlags::default(), duso_server::builtins::table());

    let config = ServerConfig { address: "127.0.0.1".into(), port, ..ServerConfig::default() };
    let server = Arc::new(Server::new(config, runtime.interpreter.clone(), "test-setup.du"));
    routes(&server);

    tokio::spawn(server.start());
    wait_until_listening(&address).await;
    address
}

async fn wait_until_listening(address: &str) {
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(address).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server never started listening on {address}");
}

fn write_script(dir: &std::path::Path, name: &str, src: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, src).unwrap();
    path.to_str().unwrap().to_string()
}

#[tokio::test]
async fn handler_script_exit_becomes_the_http_response() {
    let dir = tempfile::tempdir().unwrap();
    let hello = write_script(&dir, "hello.du", r#"exit({ status: 200, body: "hello from duso" })"#);

    let address = spawn_test_server(|server| {
        server.add_route(Method::Any, "/hello".into(), Some(hello));
    })
    .await;

    let resp = reqwest::get(format!("http://{address}/hello")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "hello from duso");
}

#[tokio::test]
async fn handler_with_no_exit_falls_through_to_204() {
    let dir = tempfile::tempdir().unwrap();
    let quiet = write_script(&dir, "quiet.du", "var x = 1 + 1");

    let address = spawn_test_server(|server| {
        server.add_route(Method::Any, "/quiet".into(), Some(quiet));
    })
    .await;

    let resp = reqwest::get(format!("http://{address}/quiet")).await.unwrap();
    assert_eq!(resp.status(), 204);
}

#[tokio::test]
async fn longest_registered_prefix_wins_over_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let api = write_script(&dir, "api.du", r#"exit({ status: 200, body: "api" })"#);
    let users = write_script(&dir, "users.du", r#"exit({ status: 200, body: "users" })"#);

    let address = spawn_test_server(|server| {
        server.add_route(Method::Any, "/api".into(), Some(api));
        server.add_route(Method::Any, "/api/users".into(), Some(users));
    })
    .await;

    let resp = reqwest::get(format!("http://{address}/api/users/42")).await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "users");
    let resp = reqwest::get(format!("http://{address}/api/other")).await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "api");
}

#[tokio::test]
async fn static_route_serves_a_file_from_disk() {
    let static_dir = tempfile::tempdir().unwrap();
    std::fs::write(static_dir.path().join("index.html"), "<h1>hi</h1>").unwrap();

    let address = spawn_test_server(|server| {
        server.add_static("/assets".into(), static_dir.path().to_str().unwrap().to_string());
    })
    .await;

    let resp = reqwest::get(format!("http://{address}/assets/index.html")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "<h1>hi</h1>");
}

#[tokio::test]
async fn unmatched_path_is_a_404() {
    let address = spawn_test_server(|_server| {}).await;
    let resp = reqwest::get(format!("http://{address}/nothing-here")).await.unwrap();
    assert_eq!(resp.status(), 404);
}
