//! In-process HTTP range server for tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures::StreamExt;
use tokio::net::TcpListener;
use url::Url;

#[derive(Default)]
pub struct ServerOptions {
    /// Answer every `/file` request with this status.
    pub fail_with: Option<StatusCode>,
    /// Only start failing after this many successful requests.
    pub fail_after: usize,
    /// Stop failing after this many failed requests.
    pub fail_times: Option<usize>,
    /// Only ranges starting at or after this offset fail.
    pub fail_from: Option<usize>,
    /// Answer range requests with `200 OK` and the whole body.
    pub ignore_range: bool,
    /// Keep sending past the requested range, up to the end of the data.
    pub overlong: bool,
    /// Send only this many bytes of each range.
    pub short_body: Option<usize>,
    /// Send this many bytes of each range, then hang.
    pub stall_after: Option<usize>,
    /// Omit `Content-Range` from partial responses.
    pub no_content_range: bool,
    pub disposition: Option<String>,
}

pub struct MockState {
    data: Vec<u8>,
    options: ServerOptions,
    requests: AtomicUsize,
    ranges: Mutex<Vec<String>>,
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockServer {
    pub async fn start(data: Vec<u8>) -> Self {
        Self::start_with(data, ServerOptions::default()).await
    }

    pub async fn start_with(data: Vec<u8>, options: ServerOptions) -> Self {
        let state = Arc::new(MockState {
            data,
            options,
            requests: AtomicUsize::new(0),
            ranges: Mutex::new(vec![]),
        });
        let app = Router::new()
            .route("/file", get(serve_file))
            .route("/cover.jpg", get(serve_file))
            .route("/moved", get(|| async { Redirect::temporary("/file") }))
            .route("/loop", get(|| async { Redirect::temporary("/loop") }))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", self.addr, path)).unwrap()
    }

    /// Requests that reached `/file`.
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn ranges(&self) -> Vec<String> {
        self.state.ranges.lock().unwrap().clone()
    }
}

async fn serve_file(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    let seen = state.requests.fetch_add(1, Ordering::SeqCst);
    let options = &state.options;
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(r) = &range {
        state.ranges.lock().unwrap().push(r.clone());
    }
    let requested = range.as_deref().and_then(parse_range);

    if let Some(status) = options.fail_with {
        let counted = seen >= options.fail_after && options.fail_times.map_or(true, |n| seen < options.fail_after + n);
        let targeted = options
            .fail_from
            .map_or(true, |from| requested.map_or(false, |(start, _)| start >= from));
        if counted && targeted {
            return status.into_response();
        }
    }

    let total = state.data.len();
    let Some((start, end)) = requested.filter(|_| !options.ignore_range) else {
        return (StatusCode::OK, state.data.clone()).into_response();
    };
    if total == 0 || start >= total || start > end {
        return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
    }
    let end = end.min(total - 1);

    let mut response = Response::builder().status(StatusCode::PARTIAL_CONTENT);
    if !options.no_content_range {
        response = response.header(header::CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, total));
    }
    if let Some(disposition) = &options.disposition {
        response = response.header(header::CONTENT_DISPOSITION, disposition.as_str());
    }

    let body_end = if options.overlong { total - 1 } else { end };
    let mut body = state.data[start..=body_end].to_vec();
    if let Some(len) = options.short_body {
        body.truncate(len);
    }
    let body = match options.stall_after {
        Some(len) => {
            body.truncate(len);
            let head = (!body.is_empty()).then(|| Ok::<_, std::io::Error>(Bytes::from(body)));
            Body::from_stream(futures::stream::iter(head).chain(futures::stream::pending()))
        }
        None => Body::from(body),
    };
    response.body(body).unwrap()
}

fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

pub fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
