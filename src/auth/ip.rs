//! Client IP extraction utilities.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::ConnectInfo,
    http::{Extensions, HeaderMap, HeaderName, request::Parts},
};

/// Where the client address of a request comes from.
#[derive(Debug, Clone, Default)]
pub enum ClientIpSource {
    /// The peer address of the TCP connection.
    #[default]
    ConnectInfo,
    /// The first address listed in a header set by a trusted reverse proxy.
    Header(HeaderName),
}

/// Trait for types that provide access to HTTP headers and extensions.
/// Implemented for both `Parts` and `Request` to allow flexible IP extraction.
pub trait HasHeadersAndExtensions {
    fn headers(&self) -> &HeaderMap;
    fn extensions(&self) -> &Extensions;
}

impl HasHeadersAndExtensions for Parts {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }
    fn extensions(&self) -> &Extensions {
        &self.extensions
    }
}

impl<B> HasHeadersAndExtensions for axum::extract::Request<B> {
    fn headers(&self) -> &HeaderMap {
        axum::extract::Request::headers(self)
    }
    fn extensions(&self) -> &Extensions {
        axum::extract::Request::extensions(self)
    }
}

/// Extract client IP address based on configuration.
///
/// A configured header must be present and hold a valid address; there is
/// no fallback to the socket address.
pub fn extract_client_ip<T: HasHeadersAndExtensions>(
    source: &T,
    ip_source: &ClientIpSource,
) -> Result<String, &'static str> {
    match ip_source {
        ClientIpSource::Header(name) => {
            let header_value = source
                .headers()
                .get(name)
                .ok_or("IP header not present")?
                .to_str()
                .map_err(|_| "IP header contains invalid characters")?;
            // X-Forwarded-For style lists carry the client first
            let first = header_value.split(',').next().unwrap_or_default().trim();
            first
                .parse::<IpAddr>()
                .map(|ip| ip.to_string())
                .map_err(|_| "IP header does not contain a valid address")
        }
        ClientIpSource::ConnectInfo => source
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .ok_or("No client IP available"),
    }
}
