//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use ring_client::config::ServerAddress;
use ring_client::protocol::Response;
use ring_client::transport::codec::{self, RequestFrame, ResponseFrame};
use ring_client::ClientConfig;

const MAX_FRAME: usize = 1 << 20;

/// A backend speaking the framed protocol.
///
/// Answers `{"backend": <name>, "uri": <uri>}` with status 200, except:
/// - `/status/<code>` answers with that status
/// - `/garbage` answers 200 with a non-JSON body
pub struct MockBackend {
    pub addr: SocketAddr,
    pub name: &'static str,
    hits: Arc<AtomicU32>,
    accept: JoinHandle<()>,
    links: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl MockBackend {
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn server(&self) -> ServerAddress {
        ServerAddress::new(self.addr.ip().to_string(), self.addr.port())
    }

    /// Stop accepting and drop every open connection.
    pub fn stop(&self) {
        self.accept.abort();
        for link in self.links.lock().unwrap().drain(..) {
            link.abort();
        }
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start a mock backend on `addr`.
pub async fn start_mock_backend(addr: SocketAddr, name: &'static str) -> MockBackend {
    let listener = TcpListener::bind(addr).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU32::new(0));
    let links: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

    let accept = {
        let hits = hits.clone();
        let links = links.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, _)) => {
                        let handle = tokio::spawn(serve_link(socket, name, hits.clone()));
                        links.lock().unwrap().push(handle);
                    }
                    Err(_) => break,
                }
            }
        })
    };

    MockBackend {
        addr,
        name,
        hits,
        accept,
        links,
    }
}

async fn serve_link(socket: TcpStream, name: &'static str, hits: Arc<AtomicU32>) {
    let (mut reader, mut writer) = socket.into_split();
    while let Ok(Some(payload)) = codec::read_frame(&mut reader, MAX_FRAME).await {
        let Ok(frame) = codec::decode::<RequestFrame>(&payload) else { break };
        hits.fetch_add(1, Ordering::SeqCst);

        let uri = frame.request.uri;
        let response = if let Some(code) = uri.strip_prefix("/status/") {
            Response::new(code.parse().unwrap_or(500), format!(r#"{{"backend":"{}"}}"#, name))
        } else if uri == "/garbage" {
            Response::new(200, "<html>oops</html>")
        } else {
            Response::new(200, format!(r#"{{"backend":"{}","uri":"{}"}}"#, name, uri))
        };

        let bytes = codec::encode(&ResponseFrame { id: frame.id, response }, MAX_FRAME).unwrap();
        if codec::write_frame(&mut writer, &bytes).await.is_err() {
            break;
        }
    }
}

/// An address nothing is listening on (yet).
pub async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn server_of(addr: SocketAddr) -> ServerAddress {
    ServerAddress::new(addr.ip().to_string(), addr.port())
}

pub fn client_config(servers: Vec<ServerAddress>, ready_with_one: bool) -> ClientConfig {
    let mut config = ClientConfig::with_servers(servers);
    config.ready_with_one = ready_with_one;
    config.reconnect.base_delay_ms = 50;
    config
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
