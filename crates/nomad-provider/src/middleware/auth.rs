//! HTTP basic authentication for the administrative routes.

use axum::http::StatusCode;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http::{Request, Response};
use std::path::Path;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::error::{ProviderError, ProviderResult};

const USER_FILE: &str = "basic-auth-user";
const PASSWORD_FILE: &str = "basic-auth-password";

/// The single user allowed on the administrative routes.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Read the user and password files from the secret directory.
    pub fn load(dir: &Path) -> ProviderResult<Self> {
        let read = |name: &str| -> ProviderResult<String> {
            let path = dir.join(name);
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                ProviderError::Config(format!("unable to read {}: {e}", path.display()))
            })?;
            Ok(raw.trim().to_owned())
        };

        let credentials = Self::new(read(USER_FILE)?, read(PASSWORD_FILE)?);
        if credentials.user.is_empty() {
            return Err(ProviderError::Config(format!(
                "{USER_FILE} in {} is empty",
                dir.display()
            )));
        }
        Ok(credentials)
    }

    fn matches(&self, header: &str) -> bool {
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };

        decoded
            .split_once(':')
            .is_some_and(|(user, password)| user == self.user && password == self.password)
    }
}

/// Tower layer that requires valid basic credentials.
#[derive(Debug, Clone)]
pub struct BasicAuthLayer {
    credentials: Arc<Credentials>,
}

impl BasicAuthLayer {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials: Arc::new(credentials),
        }
    }
}

impl<S> Layer<S> for BasicAuthLayer {
    type Service = BasicAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BasicAuthService {
            inner,
            credentials: self.credentials.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BasicAuthService<S> {
    inner: S,
    credentials: Arc<Credentials>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for BasicAuthService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let credentials = self.credentials.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let authorised = req
                .headers()
                .get(http::header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .is_some_and(|header| credentials.matches(header));

            if authorised {
                inner.call(req).await
            } else {
                tracing::debug!(path = %req.uri().path(), "Rejected unauthenticated request");
                Ok(unauthorized_response())
            }
        })
    }
}

fn unauthorized_response<B: Default>() -> Response<B> {
    let mut response = Response::new(B::default());
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response.headers_mut().insert(
        http::header::WWW_AUTHENTICATE,
        http::HeaderValue::from_static("Basic realm=\"Restricted\""),
    );
    response
}
