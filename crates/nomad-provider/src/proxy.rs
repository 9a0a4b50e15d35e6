//! Invocation proxy.
//!
//! Forwards a request addressed to `/function/<name>` to one healthy replica
//! of the function and streams the reply back. Every call produces exactly one
//! invocation record on the metrics sink, whatever the outcome. Calls that
//! reach the function are recorded once the response body has been streamed.

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{ConnectInfo, Request},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures::Stream;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::time::Sleep;

use crate::api::FunctionNameExtractor;
use crate::error::{ProviderError, ProviderResult};
use crate::metrics::{InvocationRecord, MetricsSink, Outcome};
use crate::resolver::{FunctionResolver, ServiceInstance};

const X_CALL_ID: &str = "x-call-id";
const X_DURATION_SECONDS: &str = "x-duration-seconds";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Forwards invocations to resolved function instances.
#[derive(Debug, Clone)]
pub struct InvocationProxy {
    client: reqwest::Client,
    resolver: Arc<dyn FunctionResolver>,
    extractor: Arc<dyn FunctionNameExtractor>,
    sink: Arc<dyn MetricsSink>,
    default_timeout: Duration,
}

impl InvocationProxy {
    pub fn new(
        resolver: Arc<dyn FunctionResolver>,
        extractor: Arc<dyn FunctionNameExtractor>,
        sink: Arc<dyn MetricsSink>,
        default_timeout: Duration,
    ) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProviderError::Config(format!("proxy client: {e}")))?;

        Ok(Self {
            client,
            resolver,
            extractor,
            sink,
            default_timeout,
        })
    }

    /// Proxy one invocation.
    pub async fn invoke(&self, request: Request) -> Response {
        let start = Instant::now();
        let path = request.uri().path().to_owned();

        let function = match self.extractor.extract(&path) {
            Ok(name) => name,
            Err(e) => {
                tracing::debug!(path = %path, error = %e, "Rejected invocation");
                let response = e.into_response();
                self.record("unknown", Outcome::Rejected, response.status(), start);
                return response;
            }
        };

        match self.forward(&function, request, start).await {
            Ok(mut response) => {
                let elapsed = start.elapsed();
                if let Ok(value) = HeaderValue::from_str(&format!("{:.6}", elapsed.as_secs_f64())) {
                    response
                        .headers_mut()
                        .insert(HeaderName::from_static(X_DURATION_SECONDS), value);
                }
                response
            }
            Err(e) => {
                let outcome = outcome_for(&e);
                tracing::warn!(
                    function = %function,
                    outcome = outcome.as_str(),
                    error = %e,
                    "Invocation failed"
                );
                let response = e.into_response();
                self.record(&function, outcome, response.status(), start);
                response
            }
        }
    }

    /// Forward to a resolved instance. The deadline covers the whole exchange,
    /// response body included; the returned body records the invocation when it ends.
    async fn forward(
        &self,
        function: &str,
        request: Request,
        start: Instant,
    ) -> ProviderResult<Response> {
        let instance = self.resolver.resolve(function).await?;
        let deadline = instance.timeout.unwrap_or(self.default_timeout);
        let expires = tokio::time::Instant::now() + deadline;

        let client_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let (parts, body) = request.into_parts();
        let url = upstream_url(&instance, function, parts.uri.path(), parts.uri.query());

        let mut headers = strip_hop_by_hop(&parts.headers);
        headers.remove(header::CONTENT_LENGTH);
        add_forwarding_headers(&mut headers, &parts.headers, client_addr);

        let mut outbound = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers);
        if body.size_hint().exact() != Some(0) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        tracing::debug!(
            function = %function,
            method = %parts.method,
            upstream = %url,
            deadline = ?deadline,
            "Forwarding invocation"
        );

        let upstream = match tokio::time::timeout_at(expires, outbound.send()).await {
            Err(_) => return Err(ProviderError::UpstreamTimeout(deadline)),
            Ok(Err(e)) if e.is_timeout() => return Err(ProviderError::UpstreamTimeout(deadline)),
            Ok(Err(e)) => {
                self.resolver.evict(function, &instance);
                return Err(ProviderError::UpstreamConnection(format!(
                    "{}: {e}",
                    instance.authority()
                )));
            }
            Ok(Ok(response)) => response,
        };

        let status = upstream.status();
        let headers = strip_hop_by_hop(upstream.headers());

        let body = MeteredBody {
            inner: Box::pin(upstream.bytes_stream()),
            expiry: Box::pin(tokio::time::sleep_until(expires)),
            deadline,
            call: Some(PendingCall {
                sink: self.sink.clone(),
                function: function.to_owned(),
                status,
                start,
            }),
        };

        let mut response = Response::new(Body::from_stream(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    fn record(&self, function: &str, outcome: Outcome, status: StatusCode, start: Instant) {
        self.sink.record_invocation(&InvocationRecord {
            function: function.to_owned(),
            outcome,
            status: status.as_u16(),
            latency: start.elapsed(),
        });
    }
}

/// Invocation that reached the function, recorded when its body ends.
struct PendingCall {
    sink: Arc<dyn MetricsSink>,
    function: String,
    status: StatusCode,
    start: Instant,
}

impl PendingCall {
    fn finish(self, outcome: Outcome) {
        self.sink.record_invocation(&InvocationRecord {
            function: self.function,
            outcome,
            status: self.status.as_u16(),
            latency: self.start.elapsed(),
        });
    }
}

/// Upstream response body bounded by the call deadline.
struct MeteredBody {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    expiry: Pin<Box<Sleep>>,
    deadline: Duration,
    call: Option<PendingCall>,
}

impl MeteredBody {
    fn fail(&mut self, error: ProviderError) -> Poll<Option<ProviderResult<Bytes>>> {
        let outcome = outcome_for(&error);
        if let Some(call) = self.call.take() {
            tracing::warn!(
                function = %call.function,
                outcome = outcome.as_str(),
                error = %error,
                "Invocation body aborted"
            );
            call.finish(outcome);
        }
        Poll::Ready(Some(Err(error)))
    }
}

impl Stream for MeteredBody {
    type Item = ProviderResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.call.is_none() {
            return Poll::Ready(None);
        }
        if this.expiry.is_elapsed() {
            return this.fail(ProviderError::UpstreamTimeout(this.deadline));
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => return Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) if e.is_timeout() => {
                return this.fail(ProviderError::UpstreamTimeout(this.deadline));
            }
            Poll::Ready(Some(Err(e))) => {
                return this.fail(ProviderError::UpstreamConnection(e.to_string()));
            }
            Poll::Ready(None) => {
                if let Some(call) = this.call.take() {
                    call.finish(Outcome::Success);
                }
                return Poll::Ready(None);
            }
            Poll::Pending => {}
        }

        if this.expiry.as_mut().poll(cx).is_ready() {
            return this.fail(ProviderError::UpstreamTimeout(this.deadline));
        }
        Poll::Pending
    }
}

impl Drop for MeteredBody {
    // The client went away before the body ended.
    fn drop(&mut self) {
        if let Some(call) = self.call.take() {
            call.finish(Outcome::Success);
        }
    }
}

const fn outcome_for(error: &ProviderError) -> Outcome {
    match error {
        ProviderError::NoInstance(_) | ProviderError::FunctionNotFound(_) => Outcome::ResolverMiss,
        ProviderError::ResolverUnavailable(_) => Outcome::ResolverError,
        ProviderError::UpstreamTimeout(_) => Outcome::Timeout,
        ProviderError::MissingFunctionName | ProviderError::InvalidFunctionName(_) => {
            Outcome::Rejected
        }
        _ => Outcome::UpstreamError,
    }
}

/// Target URL on `instance`, keeping the sub-path after the function name and the query.
fn upstream_url(
    instance: &ServiceInstance,
    function: &str,
    path: &str,
    query: Option<&str>,
) -> String {
    let prefix = format!("/function/{function}");
    let rest = path.strip_prefix(&prefix).unwrap_or_default();
    let rest = if rest.is_empty() { "/" } else { rest };

    match query {
        Some(query) if !query.is_empty() => format!("{}{rest}?{query}", instance.base_url()),
        _ => format!("{}{rest}", instance.base_url()),
    }
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in HOP_BY_HOP {
        out.remove(name);
    }
    out
}

fn add_forwarding_headers(
    outbound: &mut HeaderMap,
    inbound: &HeaderMap,
    client_addr: Option<std::net::IpAddr>,
) {
    if let Some(ip) = client_addr {
        let forwarded_for = match inbound.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {ip}"),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            outbound.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
        }
    }

    if !outbound.contains_key(X_FORWARDED_HOST) {
        if let Some(host) = inbound.get(header::HOST) {
            outbound.insert(HeaderName::from_static(X_FORWARDED_HOST), host.clone());
        }
    }

    if !outbound.contains_key(X_CALL_ID) {
        if let Ok(value) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
            outbound.insert(HeaderName::from_static(X_CALL_ID), value);
        }
    }
}
