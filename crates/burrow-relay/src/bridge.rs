//! Conversion between public HTTP traffic and tunnel messages

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use burrow_proto::{MultiMap, TunnelReply, TunnelRequest};
use tracing::{debug, warn};

/// Headers that describe the framing of the agent's connection, not the reply
const FRAMING_HEADERS: [&str; 3] = ["content-length", "transfer-encoding", "connection"];

/// Build the tunnel message for a public request; the id is assigned later
pub fn tunnel_request(method: &Method, uri: &Uri, headers: &HeaderMap, body: &[u8]) -> TunnelRequest {
    TunnelRequest {
        method: method.as_str().to_string(),
        targeted_route: uri.path().to_string(),
        headers: headers_to_multimap(headers),
        params: query_to_multimap(uri.query()),
        body: String::from_utf8_lossy(body).into_owned(),
        id: String::new(),
    }
}

/// Header names come out lowercase; values that are not UTF-8 are converted lossily
pub fn headers_to_multimap(headers: &HeaderMap) -> MultiMap {
    let mut map = MultiMap::new();
    for (name, value) in headers {
        map.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    map
}

pub fn query_to_multimap(query: Option<&str>) -> MultiMap {
    let mut map = MultiMap::new();
    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            map.entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }
    }
    map
}

/// Turn the agent's reply into the public response
///
/// A status code outside the valid range yields `502`. Header entries that
/// are not valid HTTP are skipped.
pub fn reply_response(reply: TunnelReply) -> Response {
    let Ok(status) = StatusCode::from_u16(reply.status_code) else {
        warn!(
            request_id = %reply.id,
            status_code = reply.status_code,
            "Agent replied with an invalid status code"
        );
        return (
            StatusCode::BAD_GATEWAY,
            format!("invalid status code from agent: {}", reply.status_code),
        )
            .into_response();
    };

    let mut response = Response::new(Body::from(reply.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, values) in reply.headers {
        if FRAMING_HEADERS
            .iter()
            .any(|framing| name.eq_ignore_ascii_case(framing))
        {
            continue;
        }
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            debug!(request_id = %reply.id, header = %name, "Skipping invalid reply header name");
            continue;
        };
        for value in values {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.append(header_name.clone(), value);
                }
                Err(_) => {
                    debug!(request_id = %reply.id, header = %name, "Skipping invalid reply header value")
                }
            }
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::header;

    #[test]
    fn test_tunnel_request_from_parts() {
        let uri: Uri = "/orders/42?page=2&tag=a&tag=b%20c".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.append("x-trace", HeaderValue::from_static("1"));
        headers.append("x-trace", HeaderValue::from_static("2"));

        let request = tunnel_request(&Method::POST, &uri, &headers, b"qty=3");

        assert_eq!(request.method, "POST");
        assert_eq!(request.targeted_route, "/orders/42");
        assert_eq!(request.body, "qty=3");
        assert!(request.id.is_empty());
        assert_eq!(request.headers["accept"], vec!["application/json".to_string()]);
        assert_eq!(request.headers["x-trace"], vec!["1".to_string(), "2".to_string()]);
        assert_eq!(request.params["page"], vec!["2".to_string()]);
        assert_eq!(request.params["tag"], vec!["a".to_string(), "b c".to_string()]);
    }

    #[test]
    fn test_query_without_values() {
        assert!(query_to_multimap(None).is_empty());
        let params = query_to_multimap(Some("flag&empty="));
        assert_eq!(params["flag"], vec![String::new()]);
        assert_eq!(params["empty"], vec![String::new()]);
    }

    #[test]
    fn test_binary_body_is_converted_lossily() {
        let uri: Uri = "/upload".parse().unwrap();
        let request = tunnel_request(&Method::PUT, &uri, &HeaderMap::new(), &[0x66, 0xff, 0x6f]);
        assert_eq!(request.body, "f\u{fffd}o");
    }

    #[tokio::test]
    async fn test_reply_response_copies_status_headers_body() {
        let reply = TunnelReply::new("r1", 201)
            .with_header("content-type", "application/json")
            .with_header("set-cookie", "a=1")
            .with_header("set-cookie", "b=2")
            .with_header("Content-Length", "999")
            .with_header("transfer-encoding", "chunked")
            .with_body(r#"{"id":7}"#);

        let response = reply_response(reply);

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let cookies: Vec<_> = response.headers().get_all(header::SET_COOKIE).iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(response.headers().get(header::TRANSFER_ENCODING).is_none());

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"id":7}"#);
    }

    #[test]
    fn test_reply_response_invalid_status() {
        let response = reply_response(TunnelReply::new("r1", 42));
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_reply_response_skips_invalid_headers() {
        let reply = TunnelReply::new("r1", 200)
            .with_header("bad header", "x")
            .with_header("x-ok", "fine")
            .with_header("x-bad-value", "line\nbreak");

        let response = reply_response(reply);

        assert_eq!(response.headers().len(), 1);
        assert_eq!(response.headers()["x-ok"], "fine");
    }
}
