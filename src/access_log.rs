//! Common Log Format access lines.
//!
//! `host - user [02/Jan/2006:15:04:05 -0700] "GET /x HTTP/1.1" 404 19`

use std::fmt;

use chrono::{DateTime, FixedOffset, Local};

use crate::request::Request;

const TIMESTAMP_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// The request half of an access line, captured before the request is
/// handed to the handler chain.
pub(crate) struct RequestLine {
    host: String,
    user: String,
    method: String,
    uri: String,
    proto: String,
}

impl RequestLine {
    pub(crate) fn capture(req: &Request) -> Self {
        let host = match req.remote_addr() {
            Some(addr) => addr.ip().to_string(),
            None => req.uri().host().map(str::to_owned)
                .or_else(|| req.header("host").map(strip_port))
                .unwrap_or_else(|| "-".to_owned()),
        };
        let user = req.uri().authority()
            .and_then(|a| a.as_str().rsplit_once('@'))
            .map(|(userinfo, _)| userinfo.split(':').next().unwrap_or("-").to_owned())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "-".to_owned());
        let uri = req.uri().path_and_query()
            .map_or_else(|| req.path().to_owned(), |pq| pq.as_str().to_owned());

        Self {
            host,
            user,
            method: req.method().as_str().to_owned(),
            uri,
            proto: format!("{:?}", req.version()),
        }
    }

    pub(crate) fn finish(self, status: u16, size: usize) -> AccessLogEntry {
        AccessLogEntry { request: self, time: Local::now().fixed_offset(), status, size }
    }
}

/// `host:port` → `host`; anything without a parseable port is kept whole.
fn strip_port(host: &str) -> String {
    match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() && port.parse::<u16>().is_ok() => {
            name.trim_start_matches('[').trim_end_matches(']').to_owned()
        }
        _ => host.to_owned(),
    }
}

pub(crate) struct AccessLogEntry {
    request: RequestLine,
    time: DateTime<FixedOffset>,
    status: u16,
    size: usize,
}

impl fmt::Display for AccessLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.request;
        write!(
            f,
            "{} - {} [{}] \"{} {} {}\" {} {}",
            r.host,
            r.user,
            self.time.format(TIMESTAMP_FORMAT),
            r.method,
            r.uri,
            r.proto,
            self.status,
            self.size,
        )
    }
}
