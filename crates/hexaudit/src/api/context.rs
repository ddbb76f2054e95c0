//! Request metadata capture for audit rows
//!
//! X-Forwarded-For and X-Real-IP are only honoured when the socket peer is a
//! configured trusted proxy; otherwise any client could forge its address.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::audit::RequestContext;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Middleware that attaches a [`RequestContext`] to every request and echoes
/// the request id on the response.
pub async fn capture_context(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let ctx = extract_context(&req, &state.trusted_proxies);
    let request_id = ctx.request_id.clone();
    req.extensions_mut().insert(ctx);

    let mut res = next.run(req).await;
    if let Some(value) = request_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
        res.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    res
}

pub(crate) fn extract_context(req: &Request<Body>, trusted: &HashSet<IpAddr>) -> RequestContext {
    let user_agent = header_str(req, "User-Agent").map(str::to_string);
    let request_id = header_str(req, REQUEST_ID_HEADER)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    RequestContext {
        ip_address: extract_client_ip(req, trusted).map(|ip| ip.to_string()),
        user_agent,
        request_id: Some(request_id),
        session: None,
    }
}

fn header_str<'a>(req: &'a Request<Body>, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

fn connection_ip(req: &Request<Body>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Client IP, trusting proxy headers only from trusted peers
fn extract_client_ip(req: &Request<Body>, trusted: &HashSet<IpAddr>) -> Option<IpAddr> {
    let connection_ip = connection_ip(req);

    if connection_ip.is_some_and(|ip| trusted.contains(&ip)) {
        // Take the first IP in the chain (client IP)
        if let Some(forwarded) = header_str(req, "X-Forwarded-For") {
            if let Some(ip) = forwarded
                .split(',')
                .next()
                .and_then(|s| s.trim().parse().ok())
            {
                return Some(ip);
            }
        }

        if let Some(ip) = header_str(req, "X-Real-IP").and_then(|s| s.trim().parse().ok()) {
            return Some(ip);
        }
    }

    connection_ip
}
