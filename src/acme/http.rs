//! The HTTP seam the ACME client talks through. Production uses hyper over
//! rustls; tests plug in a scripted transport.

use super::{AcmeError, AcmeErrorKind};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::collections::HashMap;

/// A response, headers lower-cased.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn json(&self) -> Result<serde_json::Value, AcmeError> {
        serde_json::from_slice(&self.body).map_err(|e| AcmeErrorKind::Json(e.to_string()).into())
    }
}

#[async_trait]
pub trait AcmeHttp: Send + Sync {
    async fn request(&self, method: &str, url: &str, content_type: Option<&str>, body: Vec<u8>) -> Result<HttpResponse, AcmeError>;
}

/// The hyper-backed transport.
pub struct HyperAcmeHttp {
    client: Client<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>, Full<Bytes>>,
}

impl HyperAcmeHttp {
    pub fn new() -> Result<HyperAcmeHttp, AcmeError> {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| AcmeError::new(AcmeErrorKind::Http(e.to_string())))?
            .https_or_http()
            .enable_http1()
            .build();
        Ok(HyperAcmeHttp {
            client: Client::builder(TokioExecutor::new()).build(https),
        })
    }
}

#[async_trait]
impl AcmeHttp for HyperAcmeHttp {
    async fn request(&self, method: &str, url: &str, content_type: Option<&str>, body: Vec<u8>) -> Result<HttpResponse, AcmeError> {
        let http_err = |e: String| AcmeError::new(AcmeErrorKind::Http(e));

        let mut builder = hyper::Request::builder()
            .method(method)
            .uri(url)
            .header(hyper::header::USER_AGENT, concat!("ironftpd/", env!("CARGO_PKG_VERSION")));
        if let Some(content_type) = content_type {
            builder = builder.header(hyper::header::CONTENT_TYPE, content_type);
        }
        let request = builder.body(Full::new(Bytes::from(body))).map_err(|e| http_err(e.to_string()))?;

        let response = self.client.request(request).await.map_err(|e| http_err(e.to_string()))?;
        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
            }
        }
        let body = response.into_body().collect().await.map_err(|e| http_err(e.to_string()))?.to_bytes().to_vec();

        Ok(HttpResponse { status, headers, body })
    }
}
