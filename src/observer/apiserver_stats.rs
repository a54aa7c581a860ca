//! Supplemental built-in observer: counts request/response traffic labeled
//! by verb, object, user-agent, source, and username, for traffic shaped
//! like a Kubernetes API server's. Exposition is left to whichever
//! `metrics` exporter the embedding deployment wires up.

use base64::Engine;
use x509_cert::Certificate;

use super::Observer;
use crate::http::message::{ParsedRequest, ParsedResponse};

pub struct ApiServerStatsObserver;

impl ApiServerStatsObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ApiServerStatsObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer for ApiServerStatsObserver {
    fn name(&self) -> &str {
        "k8sapiserver"
    }

    fn on_request(&self, req: &ParsedRequest, client_cert: Option<&Certificate>) {
        let verb = verb_for(&req.method, req.is_watch());
        let object = path_only(&req.uri);
        let ua = user_agent(req.header("user-agent"));
        let source = "unknown".to_string();
        let username = extract_username(req.header("authorization"), client_cert);

        metrics::counter!(
            "request_count",
            "verb" => verb.clone(), "object" => object.clone(), "ua" => ua.clone(),
            "source" => source.clone(), "username" => username.clone()
        )
        .increment(1);
        metrics::counter!(
            "request_length",
            "verb" => verb, "object" => object, "ua" => ua,
            "source" => source, "username" => username
        )
        .increment(req.body.len() as u64);
    }

    fn on_response(&self, resp: &ParsedResponse, _client_cert: Option<&Certificate>) {
        metrics::counter!("payload_length").increment(resp.body.len() as u64);
    }
}

fn verb_for(method: &str, is_watch: bool) -> String {
    if is_watch {
        "WATCH".to_string()
    } else {
        method.to_string()
    }
}

fn path_only(uri: &str) -> String {
    uri.split('?').next().unwrap_or(uri).to_string()
}

fn user_agent(header: Option<&str>) -> String {
    header
        .and_then(|ua| ua.split('/').next())
        .unwrap_or("unknown")
        .to_string()
}

/// Best-effort subject extraction: prefer the client certificate's
/// `CN.organization`, falling back to decoding the `sub` claim out of a
/// bearer JWT's payload segment. Never hard-errors; any decode failure
/// yields `"unknown"`.
fn extract_username(authorization: Option<&str>, client_cert: Option<&Certificate>) -> String {
    if let Some(cert) = client_cert {
        return subject_identity(cert);
    }
    let Some(header) = authorization else {
        return "unknown".to_string();
    };
    let Some((_, token)) = header.split_once(' ') else {
        return "unknown".to_string();
    };
    extract_username_from_jwt(token)
}

fn subject_identity(cert: &Certificate) -> String {
    let subject = cert.tbs_certificate.subject.to_string();
    let cn = subject
        .split(',')
        .find_map(|rdn| rdn.trim().strip_prefix("CN="))
        .unwrap_or("unknown");
    let org = subject
        .split(',')
        .find_map(|rdn| rdn.trim().strip_prefix("O="));
    match org {
        Some(org) => format!("{cn}.{org}"),
        None => cn.to_string(),
    }
}

fn extract_username_from_jwt(token: &str) -> String {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return "unknown".to_string();
    }
    let Ok(payload) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(parts[1]) else {
        return "unknown".to_string();
    };
    let Ok(claims) = serde_json::from_slice::<serde_json::Value>(&payload) else {
        return "unknown".to_string();
    };
    claims
        .get("sub")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_query_maps_to_watch_verb() {
        assert_eq!(verb_for("GET", true), "WATCH");
        assert_eq!(verb_for("GET", false), "GET");
    }

    #[test]
    fn jwt_without_three_parts_is_unknown() {
        assert_eq!(extract_username_from_jwt("not-a-jwt"), "unknown");
    }

    #[test]
    fn jwt_subject_is_decoded() {
        let header = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"{}");
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(br#"{"sub":"bob"}"#);
        let token = format!("{header}.{payload}.sig");
        assert_eq!(extract_username_from_jwt(&token), "bob");
    }
}
