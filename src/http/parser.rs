//! Reads successive HTTP/1.1 request/response pairs off the teed cleartext
//! streams and hands each to the observer dispatcher, strictly paired in
//! wire order.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::error;
use x509_cert::Certificate;

use crate::error::ParseError;
use crate::http::message::{ParsedRequest, ParsedResponse};
use crate::observer::ObserverRegistry;

const MAX_HEADERS: usize = 64;
const READ_CHUNK: usize = 8 * 1024;

/// Buffered reader over a teed cleartext stream, accumulating bytes until a
/// full HTTP/1.1 message (head + body) can be framed.
struct MessageReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Reads more bytes from the underlying stream into `buf`. Returns
    /// `Ok(0)` on clean EOF.
    async fn fill(&mut self) -> std::io::Result<usize> {
        let mut tmp = [0u8; READ_CHUNK];
        let n = self.inner.read(&mut tmp).await?;
        self.buf.extend_from_slice(&tmp[..n]);
        Ok(n)
    }

    async fn read_exact_body(&mut self, len: usize) -> Result<Bytes, ParseError> {
        while self.buf.len() < len {
            if self.fill().await.map_err(|_| ParseError::PipeClosed)? == 0 {
                return Err(ParseError::PipeClosed);
            }
        }
        Ok(self.buf.split_to(len).freeze())
    }

    async fn read_chunked_body(&mut self) -> Result<Bytes, ParseError> {
        let mut out = BytesMut::new();
        loop {
            let line = self.read_line().await?;
            let size_str = line.split(';').next().unwrap_or("").trim();
            let size = usize::from_str_radix(size_str, 16)
                .map_err(|_| ParseError::InvalidChunkFraming(line.clone()))?;
            if size == 0 {
                // Trailing headers terminated by a blank line; we don't
                // surface trailers to observers.
                loop {
                    let trailer_line = self.read_line().await?;
                    if trailer_line.is_empty() {
                        break;
                    }
                }
                break;
            }
            let chunk = self.read_exact_body(size).await?;
            out.extend_from_slice(&chunk);
            let crlf = self.read_exact_body(2).await?;
            if crlf.as_ref() != b"\r\n" {
                return Err(ParseError::InvalidChunkFraming(
                    "missing chunk trailing CRLF".to_string(),
                ));
            }
        }
        Ok(out.freeze())
    }

    async fn read_line(&mut self) -> Result<String, ParseError> {
        loop {
            if let Some(pos) = find_crlf(&self.buf) {
                let line = self.buf.split_to(pos).freeze();
                self.buf.advance(2);
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            if self.fill().await.map_err(|_| ParseError::PipeClosed)? == 0 {
                return Err(ParseError::PipeClosed);
            }
        }
    }

    /// Attempts to parse a complete request head from buffered data,
    /// pulling more bytes as needed. Returns `Ok(None)` on clean EOF before
    /// any bytes of a new message have arrived.
    async fn read_request(&mut self) -> Result<Option<ParsedRequest>, ParseError> {
        let head = loop {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut req = httparse::Request::new(&mut headers);
            match req.parse(&self.buf) {
                Ok(httparse::Status::Complete(consumed)) => {
                    let method = req.method.unwrap_or("GET").to_string();
                    let uri = req.path.unwrap_or("/").to_string();
                    let version_minor = req.version.unwrap_or(1);
                    let owned_headers = owned_headers(req.headers);
                    self.buf.advance(consumed);
                    break (method, uri, version_minor, owned_headers);
                }
                Ok(httparse::Status::Partial) => {
                    if self.fill().await.map_err(|_| ParseError::PipeClosed)? == 0 {
                        if self.buf.is_empty() {
                            return Ok(None);
                        }
                        return Err(ParseError::Httparse(httparse::Error::Token));
                    }
                }
                Err(err) => return Err(ParseError::Httparse(err)),
            }
        };
        let (method, uri, version_minor, headers) = head;
        let body = self.read_body(&headers, method != "HEAD").await?;
        Ok(Some(ParsedRequest {
            method,
            uri,
            version_minor,
            headers,
            body,
            client_addr: self.placeholder_addr(),
        }))
    }

    fn placeholder_addr(&self) -> SocketAddr {
        // Overwritten by the caller immediately after parsing; kept here so
        // `ParsedRequest` construction stays in one place.
        ([0, 0, 0, 0], 0).into()
    }

    async fn read_response(
        &mut self,
        request_method: &str,
    ) -> Result<Option<ParsedResponse>, ParseError> {
        let head = loop {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut resp = httparse::Response::new(&mut headers);
            match resp.parse(&self.buf) {
                Ok(httparse::Status::Complete(consumed)) => {
                    let status = resp.code.unwrap_or(0);
                    let reason = resp.reason.unwrap_or("").to_string();
                    let version_minor = resp.version.unwrap_or(1);
                    let owned_headers = owned_headers(resp.headers);
                    self.buf.advance(consumed);
                    break (status, reason, version_minor, owned_headers);
                }
                Ok(httparse::Status::Partial) => {
                    if self.fill().await.map_err(|_| ParseError::PipeClosed)? == 0 {
                        if self.buf.is_empty() {
                            return Ok(None);
                        }
                        return Err(ParseError::Httparse(httparse::Error::Token));
                    }
                }
                Err(err) => return Err(ParseError::Httparse(err)),
            }
        };
        let (status, reason, version_minor, headers) = head;
        // RFC 7230 §3.3.3: responses to HEAD, 1xx, 204, and 304 never carry
        // a body regardless of framing headers present.
        let has_body = request_method != "HEAD"
            && !(100..200).contains(&status)
            && status != 204
            && status != 304;
        let body = if has_body {
            self.read_body(&headers, true).await?
        } else {
            Bytes::new()
        };
        Ok(Some(ParsedResponse {
            status,
            reason,
            version_minor,
            headers,
            body,
        }))
    }

    async fn read_body(
        &mut self,
        headers: &[(String, String)],
        allow_body: bool,
    ) -> Result<Bytes, ParseError> {
        if !allow_body {
            return Ok(Bytes::new());
        }
        let is_chunked = headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("transfer-encoding") && v.to_ascii_lowercase().contains("chunked"));
        if is_chunked {
            return self.read_chunked_body().await;
        }
        let content_length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .map(|(_, v)| v.trim().parse::<usize>())
            .transpose()
            .map_err(|_| ParseError::InvalidContentLength("non-numeric content-length".into()))?;
        match content_length {
            Some(len) if len > 0 => self.read_exact_body(len).await,
            _ => Ok(Bytes::new()),
        }
    }
}

fn owned_headers(headers: &[httparse::Header<'_>]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).into_owned(),
            )
        })
        .collect()
}

fn find_crlf(buf: &BytesMut) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Consumes the teed request and response streams for one connection,
/// dispatching each parsed exchange to the observer registry in strict
/// FIFO order (HTTP/1.1 pipelining is respected: multiple in-flight
/// requests are processed in issue order).
pub async fn run_parser_loop<RQ, RS>(
    req_reader: RQ,
    resp_reader: RS,
    client_addr: SocketAddr,
    client_cert: Option<Certificate>,
    observers: Arc<ObserverRegistry>,
) where
    RQ: AsyncRead + Unpin,
    RS: AsyncRead + Unpin,
{
    let mut requests = MessageReader::new(req_reader);
    let mut responses = MessageReader::new(resp_reader);

    loop {
        let mut request = match requests.read_request().await {
            Ok(Some(req)) => req,
            Ok(None) => break,
            Err(ParseError::PipeClosed) => break,
            Err(err) => {
                error!(error = %err, "error parsing request, terminating parser loop");
                break;
            }
        };
        request.client_addr = client_addr;

        observers.dispatch_request(&request, client_cert.as_ref());

        let response = match responses.read_response(&request.method).await {
            Ok(Some(resp)) => resp,
            Ok(None) => break,
            Err(ParseError::PipeClosed) => break,
            Err(err) => {
                error!(error = %err, "error parsing response, terminating parser loop");
                break;
            }
        };

        observers.dispatch_response(response, client_cert.clone());
    }
}
