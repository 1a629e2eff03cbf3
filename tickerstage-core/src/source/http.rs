//! Blocking HTTP plumbing shared by the source clients.
//!
//! A single request per call; retrying is the caller's job. Responses are
//! mapped onto [`FetchError`] so the retry policy can classify them.

use super::provider::FetchError;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use std::time::Duration;

/// Build a blocking client with the given timeout and user agent.
pub fn build_client(timeout: Duration, user_agent: &str) -> Result<Client, FetchError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(|e| FetchError::Config(format!("failed to build HTTP client: {e}")))
}

/// Send a request and return the response if its status is a success.
pub fn send(request: RequestBuilder) -> Result<Response, FetchError> {
    let response = request.send().map_err(classify_transport)?;
    check_status(response)
}

/// Send a request and return the body bytes.
pub fn send_bytes(request: RequestBuilder) -> Result<Vec<u8>, FetchError> {
    let response = send(request)?;
    let url = response.url().to_string();
    let bytes = response.bytes().map_err(classify_transport)?;
    if bytes.is_empty() {
        return Err(FetchError::Empty(url));
    }
    Ok(bytes.to_vec())
}

/// Send a request and parse the body as JSON.
pub fn send_json<T: serde::de::DeserializeOwned>(request: RequestBuilder) -> Result<T, FetchError> {
    let response = send(request)?;
    let url = response.url().to_string();
    let text = response.text().map_err(classify_transport)?;
    if text.trim().is_empty() {
        return Err(FetchError::Empty(url));
    }
    serde_json::from_str(&text)
        .map_err(|e| FetchError::Malformed(format!("failed to parse response from {url}: {e}")))
}

fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(status_error(status, response.url().as_str()))
}

/// Map a non-success status onto a [`FetchError`].
pub fn status_error(status: StatusCode, url: &str) -> FetchError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        FetchError::RateLimited {
            status: status.as_u16(),
        }
    } else if status == StatusCode::NOT_FOUND {
        FetchError::NotFound(url.to_string())
    } else if status.is_server_error() {
        FetchError::Server {
            status: status.as_u16(),
            url: url.to_string(),
        }
    } else {
        FetchError::Client {
            status: status.as_u16(),
            url: url.to_string(),
        }
    }
}

fn classify_transport(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() || e.is_body() {
        FetchError::Network(e.to_string())
    } else if e.is_decode() {
        FetchError::Malformed(e.to_string())
    } else if let Some(status) = e.status() {
        status_error(status, e.url().map(|u| u.as_str()).unwrap_or_default())
    } else {
        FetchError::Network(e.to_string())
    }
}
