//! Reads the value a rule classifies by out of a request.

use std::net::{IpAddr, SocketAddr};

use config::IpSource;
use http::{HeaderMap, header::COOKIE};

/// First value of a header. Values that are not visible ASCII are treated as missing.
pub(crate) fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

/// First value of a query parameter, form-url-decoded.
pub(crate) fn param(query: Option<&str>, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Value of a cookie from any `Cookie` header. An empty value counts as missing.
pub(crate) fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Client address according to the rule's address source.
pub(crate) fn client_ip(headers: &HeaderMap, source: &IpSource, remote_addr: Option<IpAddr>) -> Option<IpAddr> {
    match source {
        IpSource::RemoteAddr => remote_addr,
        IpSource::Header(name) => parse_ip(header(headers, name)?),
    }
}

/// Parses the first element of a comma separated address list, with or without a port.
pub(crate) fn parse_ip(value: &str) -> Option<IpAddr> {
    let first = value.split(',').next()?.trim();

    if let Ok(ip) = first.parse::<IpAddr>() {
        return Some(ip);
    }

    if let Ok(addr) = first.parse::<SocketAddr>() {
        return Some(addr.ip());
    }

    // `[::1]` without a port
    first
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|inner| inner.parse().ok())
}
