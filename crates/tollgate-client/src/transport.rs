use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::{CONTENT_TYPE, DATE};
use reqwest::Method;

use tollgate_core::SdkError;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Form-encoded body.
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub date: Option<String>,
    pub body: String,
}

/// Blocking HTTP round trip.
pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, SdkError>;
}

pub struct ReqwestTransport {
    client: HttpClient,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, SdkError> {
        let client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SdkError::Transport(format!("failed to build http client: {err}")))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, SdkError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| SdkError::InvalidParameters("unsupported http method"))?;
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.header(CONTENT_TYPE, FORM_CONTENT_TYPE).body(body);
        }
        let response = builder
            .send()
            .map_err(|err| SdkError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let date = response
            .headers()
            .get(DATE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .map_err(|err| SdkError::Transport(err.to_string()))?;
        Ok(HttpResponse { status, date, body })
    }
}
