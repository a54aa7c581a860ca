//! Dispatch mechanics, split out from the registry for clarity: fire-and-
//! forget request callbacks, and joined-then-released response callbacks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use x509_cert::Certificate;

use super::Observer;
use crate::http::message::{ParsedRequest, ParsedResponse};

pub(super) fn dispatch_request(
    registered: &HashMap<String, Arc<dyn Observer>>,
    enabled: &[String],
    req: &ParsedRequest,
    client_cert: Option<&Certificate>,
) {
    for name in enabled {
        let Some(observer) = registered.get(name) else {
            continue;
        };
        let observer = observer.clone();
        let req = req.clone();
        let client_cert = client_cert.cloned();
        tokio::spawn(async move {
            observer.on_request(&req, client_cert.as_ref());
        });
    }
}

pub(super) fn dispatch_response(
    registered: HashMap<String, Arc<dyn Observer>>,
    enabled: Vec<String>,
    resp: ParsedResponse,
    client_cert: Option<Certificate>,
) {
    // The join itself happens in a detached task: the parser loop that
    // called this function must not block on observer completion. Once
    // every observer has returned, the response body (owned by this task)
    // is dropped.
    tokio::spawn(async move {
        let mut set = JoinSet::new();
        for name in &enabled {
            let Some(observer) = registered.get(name) else {
                continue;
            };
            let observer = observer.clone();
            let resp = resp.clone();
            let client_cert = client_cert.clone();
            set.spawn(async move {
                observer.on_response(&resp, client_cert.as_ref());
            });
        }
        while set.join_next().await.is_some() {}
        drop(resp);
    });
}
