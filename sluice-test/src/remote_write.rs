use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Path the mock server accepts remote-write requests on.
pub const WRITE_PATH: &str = "/api/v1/write";

/// A request received by [`MockRemoteWrite`].
#[derive(Clone, Debug)]
pub struct CapturedRequest {
    /// Request headers.
    pub headers: HeaderMap,
    /// The snappy decompressed body.
    pub body: Bytes,
}

impl CapturedRequest {
    /// Decodes the body as protobuf message `M`.
    pub fn decode<M: prost::Message + Default>(&self) -> M {
        M::decode(self.body.clone()).expect("request body is not a valid protobuf message")
    }
}

/// A scripted failure response.
#[derive(Clone, Debug)]
struct Failure {
    status: StatusCode,
    retry_after: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    requests: Vec<CapturedRequest>,
    failures: VecDeque<Failure>,
    attempts: usize,
}

/// A remote-write endpoint running on a random local port.
///
/// Successfully received requests are snappy decompressed and captured. Failures can be
/// scripted with [`fail_next`](Self::fail_next); failed requests are not captured.
pub struct MockRemoteWrite {
    address: SocketAddr,
    state: Arc<Mutex<MockState>>,
    handle: JoinHandle<()>,
}

impl MockRemoteWrite {
    /// Starts the server on the current runtime.
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(MockState::default()));

        let router = Router::new()
            .route(WRITE_PATH, post(handle_write))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        sluice_log::debug!(%address, "mock remote write listening");

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            address,
            state,
            handle,
        }
    }

    /// Returns the URL of the write endpoint.
    pub fn url(&self) -> String {
        format!("http://{}{WRITE_PATH}", self.address)
    }

    /// Responds to the next request with `status` and an optional `Retry-After` header.
    ///
    /// Calls queue up, so scripting two failures fails the next two requests.
    pub fn fail_next(&self, status: u16, retry_after: Option<&str>) {
        let status = StatusCode::from_u16(status).unwrap();
        self.state.lock().failures.push_back(Failure {
            status,
            retry_after: retry_after.map(str::to_owned),
        });
    }

    /// Returns all captured requests.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.state.lock().requests.clone()
    }

    /// Returns the number of requests received, including failed ones.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// Waits until at least `count` requests were captured.
    ///
    /// Panics after `timeout`.
    pub async fn wait_for_requests(&self, count: usize, timeout: Duration) -> Vec<CapturedRequest> {
        let wait = async {
            loop {
                let requests = self.requests();
                if requests.len() >= count {
                    return requests;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {count} requests"))
    }
}

impl Drop for MockRemoteWrite {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_write(
    State(state): State<Arc<Mutex<MockState>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock();
    state.attempts += 1;

    if let Some(failure) = state.failures.pop_front() {
        let mut response = failure.status.into_response();
        if let Some(retry_after) = failure.retry_after {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_str(&retry_after).unwrap(),
            );
        }
        return response;
    }

    let body = match snap::raw::Decoder::new().decompress_vec(&body) {
        Ok(body) => Bytes::from(body),
        Err(error) => {
            return (StatusCode::BAD_REQUEST, error.to_string()).into_response();
        }
    };

    state.requests.push(CapturedRequest { headers, body });
    StatusCode::NO_CONTENT.into_response()
}
