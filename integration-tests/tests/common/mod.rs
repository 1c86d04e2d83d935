use serde_json::{json, Value};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Find a free TCP port by binding to port 0
pub fn find_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to port 0");
    listener.local_addr().unwrap().port()
}

/// Wait for a TCP port to accept connections
pub async fn wait_for_port(port: u16, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for port {} to be ready", port);
        }
        if tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port))
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Get the path to a compiled binary in the target directory
fn cargo_bin(name: &str) -> PathBuf {
    // Look for the binary in target/debug (standard cargo test location)
    let mut path = std::env::current_exe()
        .expect("Failed to get current exe")
        .parent()
        .expect("No parent")
        .parent()
        .expect("No grandparent")
        .to_path_buf();
    path.push(name);
    if path.exists() {
        return path;
    }

    // Fallback: try target/debug directly
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop(); // integration-tests -> workspace root
    path.push("target");
    path.push("debug");
    path.push(name);
    if path.exists() {
        return path;
    }

    panic!(
        "Binary '{}' not found. Run `cargo build --workspace` first.",
        name
    );
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "result": result}))
}

/// A pod network served by one mock RPC endpoint on 127.0.0.1.
///
/// Every pod advertises the mock's port as its RPC port, so the bootstrap
/// call and the per-pod stats calls all land on the same server.
pub struct MockPods {
    pub server: MockServer,
}

impl MockPods {
    /// Two online pods (one public, one private) and one pod an hour stale.
    pub async fn three_pods() -> Self {
        let server = MockServer::start().await;
        let port = server.address().port();
        let now = now_unix();

        let pod = |address: &str, last_seen: i64, is_public: bool| {
            json!({
                "address": address,
                "pubkey": format!("pk-{}", address),
                "version": "0.8.0",
                "last_seen_timestamp": last_seen,
                "is_public": is_public,
                "rpc_port": port,
                "storage_committed": 1_000_000,
                "storage_used": 250_000,
                "uptime": 86_400
            })
        };

        Mock::given(method("POST"))
            .and(path("/rpc"))
            .and(body_partial_json(json!({"method": "get-pods-with-stats"})))
            .respond_with(rpc_result(json!({
                "pods": [
                    pod("127.0.0.1:9001", now - 5, true),
                    pod("127.0.0.1:9002", now - 5, false),
                    pod("127.0.0.1:9003", now - 3600, true),
                ],
                "total_count": 3
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/rpc"))
            .and(body_partial_json(json!({"method": "get-stats"})))
            .respond_with(rpc_result(json!({
                "cpu_percent": 30.0,
                "ram_used": 2_000,
                "ram_total": 8_000,
                "uptime": 86_400,
                "packets_received": 100,
                "packets_sent": 50,
                "active_streams": 2,
                "total_bytes": 4_096,
                "total_pages": 8
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/rpc"))
            .and(body_partial_json(json!({"method": "get-version"})))
            .respond_with(rpc_result(json!({"version": "0.8.1"})))
            .mount(&server)
            .await;

        Self { server }
    }

    pub fn rpc_port(&self) -> u16 {
        self.server.address().port()
    }
}

/// A running control service polling a bootstrap on 127.0.0.1.
pub struct TestMonitor {
    pub port: u16,
    control: Child,
}

impl TestMonitor {
    /// Start the control service against `rpc_port` on an ephemeral bind port
    pub async fn start(rpc_port: u16) -> Self {
        let port = find_free_port();

        let control = Command::new(cargo_bin("podwatch-control"))
            .args(["--bind", &format!("127.0.0.1:{}", port)])
            .args(["--bootstrap", "127.0.0.1"])
            .args(["--rpc-port", &rpc_port.to_string()])
            .args(["--rpc-timeout-ms", "1000"])
            .args(["--refresh-secs", "15"])
            .arg("--geo-disabled")
            .args(["--log-level", "debug"])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .expect("Failed to start control service");

        wait_for_port(port, Duration::from_secs(10)).await;

        Self { port, control }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn process_mut(&mut self) -> &mut Child {
        &mut self.control
    }

    pub async fn get(&self, path: &str) -> (u16, Value) {
        let resp = reqwest::get(self.url(path))
            .await
            .expect("Request to control service failed");
        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await.expect("Failed to parse response");
        (status, body)
    }

    /// GET `path`, retrying while the first poll cycle is still in flight.
    pub async fn get_when_ready(&self, path: &str) -> (u16, Value) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let (status, body) = self.get(path).await;
            if body["status"] != "no_data" || tokio::time::Instant::now() > deadline {
                return (status, body);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn post(&self, path: &str) -> (u16, Value) {
        let resp = reqwest::Client::new()
            .post(self.url(path))
            .send()
            .await
            .expect("Request to control service failed");
        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await.expect("Failed to parse response");
        (status, body)
    }
}

impl Drop for TestMonitor {
    fn drop(&mut self) {
        let _ = self.control.kill();
        let _ = self.control.wait();
    }
}
