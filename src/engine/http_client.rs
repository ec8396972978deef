//! Thin wrapper around the hyper client: one timed GET per call.
//!
//! Timing starts at request dispatch and ends once the full body has been
//! received; the body must always be read to completion so pooled connections
//! stay reusable.

use std::time::{Duration, Instant};

use http::{HeaderMap, Request, Uri};
use hyper::body::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

/// A fully received response plus its measured wall-clock duration.
#[derive(Debug)]
pub struct TimedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub duration: Duration,
}

/// A request that never completed: timeout, connect error, DNS failure.
#[derive(Debug)]
pub struct TransportError {
    pub message: String,
    /// Time spent before the failure surfaced.
    pub duration: Duration,
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        Self::for_vus(1000)
    }

    /// Build a client with pool and HTTP/2 window sizes scaled to the planned
    /// VU population. Small windows at high VU counts keep memory bounded.
    pub fn for_vus(total_vus: usize) -> Self {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .expect("failed to load native TLS roots")
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();

        let pool_size = (total_vus / 5).clamp(500, 2000);
        let (conn_window, stream_window) = if total_vus > 5000 {
            (128 * 1024, 64 * 1024)
        } else if total_vus > 2000 {
            (256 * 1024, 128 * 1024)
        } else {
            (512 * 1024, 256 * 1024)
        };

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(pool_size)
            .http2_initial_connection_window_size(conn_window)
            .http2_initial_stream_window_size(stream_window)
            .build(https);

        Self { client }
    }

    /// Issue one GET and collect the full response body, timing the whole
    /// exchange. Expiry of `timeout` is a transport failure.
    pub async fn get(
        &self,
        uri: &Uri,
        timeout: Duration,
    ) -> Result<TimedResponse, TransportError> {
        let start = Instant::now();
        let fail = |message: String| TransportError {
            message,
            duration: start.elapsed(),
        };

        let req = Request::get(uri.clone())
            .body(Full::new(Bytes::new()))
            .map_err(|e| fail(e.to_string()))?;

        let exchange = async {
            let response = self.client.request(req).await.map_err(|e| e.to_string())?;
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| e.to_string())?
                .to_bytes();
            Ok::<_, String>((parts, body))
        };

        let (parts, body) = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(ok)) => ok,
            Ok(Err(message)) => return Err(fail(message)),
            Err(_) => return Err(fail("request timed out".to_string())),
        };

        Ok(TimedResponse {
            status: parts.status.as_u16(),
            headers: parts.headers,
            body,
            duration: start.elapsed(),
        })
    }
}
