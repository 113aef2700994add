use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method};
use tracing::debug;

use crate::error::LLMError;

use super::{
    DynHttpTransport, HttpBody, HttpBodyStream, HttpMethod, HttpRequest, HttpResponse,
    HttpStreamResponse, HttpTransport, MultipartForm,
};

/// Default [`HttpTransport`] backed by reqwest.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Wraps a preconfigured `reqwest::Client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn default_client() -> Result<Self, LLMError> {
        Client::builder()
            .build()
            .map(Self::new)
            .map_err(|err| LLMError::transport(format!("failed to create reqwest client: {err}")))
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        }
    }

    fn build_request(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder, LLMError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
            timeout,
        } = request;
        debug!(?method, %url, "dispatching http request");
        let mut builder = self.client.request(Self::method(method), &url);

        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        for (name, value) in headers {
            let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| LLMError::transport(format!("invalid header name: {err}")))?;
            let header_value = reqwest::header::HeaderValue::from_str(&value).map_err(|err| {
                LLMError::transport(format!("invalid header value for {header_name}: {err}"))
            })?;
            builder = builder.header(header_name, header_value);
        }

        builder = match body {
            Some(HttpBody::Json(bytes)) => builder.body(bytes),
            Some(HttpBody::Multipart(form)) => builder.multipart(Self::multipart(form)?),
            None => builder,
        };

        Ok(builder)
    }

    fn multipart(form: MultipartForm) -> Result<Form, LLMError> {
        let mut out = Form::new();
        for (name, value) in form.fields {
            out = out.text(name, value);
        }
        for file in form.files {
            let mut part = Part::bytes(file.bytes).file_name(file.file_name);
            if let Some(mime) = file.mime_type {
                part = part.mime_str(&mime).map_err(|err| {
                    LLMError::transport(format!("invalid mime type {mime}: {err}"))
                })?;
            }
            out = out.part(file.name, part);
        }
        Ok(out)
    }

    fn headers_to_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    fn send_error(err: reqwest::Error) -> LLMError {
        if err.is_timeout() {
            LLMError::transport(format!("request timed out: {err}"))
        } else if err.is_connect() {
            LLMError::transport(format!("connection failed: {err}"))
        } else {
            LLMError::transport(err.to_string())
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let response = self
            .build_request(request)?
            .send()
            .await
            .map_err(Self::send_error)?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(Self::send_error)?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let response = self
            .build_request(request)?
            .send()
            .await
            .map_err(Self::send_error)?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(Self::send_error)
        });
        let body: HttpBodyStream = Box::pin(stream);

        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Builds a shareable reqwest transport with default settings.
pub fn default_dyn_transport() -> Result<DynHttpTransport, LLMError> {
    Ok(Arc::new(ReqwestTransport::default_client()?))
}
