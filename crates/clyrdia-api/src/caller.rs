//! Who is calling: client identity for rate limiting and ownership, plus
//! the request id echoed in error bodies.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use clyrdia_engine::AdmissionError;
use uuid::Uuid;

use crate::error::ApiError;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub client: String,
    pub request_id: String,
}

impl Caller {
    /// Turn a refusal into a response tagged with this request's id.
    pub fn fail(&self, e: AdmissionError) -> ApiError {
        ApiError::from(e).with_request_id(&self.request_id)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self {
            client: client_identity(&parts.headers, peer),
            request_id: request_id(&parts.headers),
        })
    }
}

/// First `X-Forwarded-For` entry, else the peer address, else `unknown`.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// The id set by the request-id layer, or a fresh one when absent.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" 203.0.113.9 , 10.0.0.1"));
        let peer: SocketAddr = "192.0.2.1:5000".parse().unwrap();
        assert_eq!(client_identity(&headers, Some(peer)), "203.0.113.9");
        assert_eq!(client_identity(&HeaderMap::new(), Some(peer)), "192.0.2.1");
        assert_eq!(client_identity(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn request_id_falls_back_to_fresh_uuid() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-1"));
        assert_eq!(request_id(&headers), "req-1");
        assert_eq!(request_id(&HeaderMap::new()).len(), 36);
    }
}
