//! Demonstration HTTP service that rate limits a greeting per user.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, RETRY_AFTER};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::ratelimit::{Clock, FixedWindowLimiter, RateInfo, Storage};

/// Header carrying the authenticated caller's identity.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Prefix that namespaces user identities in the rate-limit key space.
const USER_KEY_PREFIX: &str = "user:";

/// HTTP server rate limiting `GET /hello` per user.
pub struct HttpServer<S: Storage + 'static, C: Clock + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    limiter: Arc<FixedWindowLimiter<S, C>>,
}

impl<S: Storage + 'static, C: Clock + 'static> HttpServer<S, C> {
    /// Create a new server around a limiter.
    pub fn new(addr: SocketAddr, limiter: Arc<FixedWindowLimiter<S, C>>) -> Self {
        Self { addr, limiter }
    }

    /// Serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Starting HTTP server");

        tokio::pin!(signal);
        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = &mut signal => break,
            };

            let limiter = Arc::clone(&self.limiter);
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let limiter = Arc::clone(&limiter);
                    async move { Ok::<_, Infallible>(handle_request(req, &limiter).await) }
                });

                let io = TokioIo::new(stream);
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(peer = %peer, error = %e, "Connection closed with error");
                }
            });
        }

        info!("HTTP server stopped accepting connections");
        Ok(())
    }
}

/// Route a request.
pub async fn handle_request<B, S, C>(
    req: Request<B>,
    limiter: &FixedWindowLimiter<S, C>,
) -> Response<Full<Bytes>>
where
    S: Storage,
    C: Clock,
{
    if req.method() != Method::GET || req.uri().path() != "/hello" {
        return text(StatusCode::NOT_FOUND, "Not found\n".to_string());
    }

    let user_id = authenticate(&req).map(str::to_owned);
    hello(user_id, limiter).await
}

async fn hello<S: Storage, C: Clock>(
    user_id: Option<String>,
    limiter: &FixedWindowLimiter<S, C>,
) -> Response<Full<Bytes>> {
    let Some(user_id) = user_id else {
        return text(StatusCode::UNAUTHORIZED, "Unauthorized user\n".to_string());
    };

    let key = format!("{}{}", USER_KEY_PREFIX, user_id);
    let info = match limiter.allow(&key).await {
        Ok(info) => info,
        Err(e) => {
            error!(key = %key, error = %e, "Rate limiter unavailable");
            return text(
                StatusCode::SERVICE_UNAVAILABLE,
                "Rate limiter unavailable\n".to_string(),
            );
        }
    };

    let reset_secs = info.reset_in.as_secs();
    let mut response = if info.allowed {
        text(
            StatusCode::OK,
            format!("hi!! You have {} calls left.\n", info.remaining_calls),
        )
    } else {
        warn!(key = %key, reset_in_secs = reset_secs, "Request rate limited");
        let mut response = text(
            StatusCode::TOO_MANY_REQUESTS,
            format!("Rate limit exceeded. Try again in {} seconds\n", reset_secs),
        );
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(reset_secs));
        response
    };

    add_rate_headers(&mut response, &info);
    response
}

/// Caller identity from the user header, if present and non-empty.
fn authenticate<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|id| !id.is_empty())
}

fn add_rate_headers(response: &mut Response<Full<Bytes>>, info: &RateInfo) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(info.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(info.remaining_calls));
    headers.insert("x-ratelimit-reset", HeaderValue::from(info.reset_in.as_secs()));
}

fn text(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{ManualClock, MemoryStorage};
    use chrono::DateTime;
    use http_body_util::BodyExt;
    use std::time::Duration;

    fn limiter(max: u64) -> FixedWindowLimiter<MemoryStorage, ManualClock> {
        let clock = ManualClock::new(DateTime::from_timestamp(1_574_107_200, 0).unwrap());
        FixedWindowLimiter::new(max, Duration::from_secs(10))
            .unwrap()
            .with_clock(clock)
    }

    fn request(path: &str, user: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user);
        }
        builder.body(()).unwrap()
    }

    async fn body(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_user_is_unauthorized() {
        let limiter = limiter(3);
        let response = handle_request(request("/hello", None), &limiter).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = handle_request(request("/hello", Some("")), &limiter).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(limiter.storage().tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_allowed_request_reports_remaining() {
        let limiter = limiter(3);
        let response = handle_request(request("/hello", Some("42")), &limiter).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "2");
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert_eq!(body(response).await, "hi!! You have 2 calls left.\n");
    }

    #[tokio::test]
    async fn test_exhausted_user_gets_too_many_requests() {
        let limiter = limiter(1);
        handle_request(request("/hello", Some("42")), &limiter).await;
        let response = handle_request(request("/hello", Some("42")), &limiter).await;

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "10");
        assert_eq!(body(response).await, "Rate limit exceeded. Try again in 10 seconds\n");

        // Another user has their own quota.
        let response = handle_request(request("/hello", Some("7")), &limiter).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_path_not_found() {
        let limiter = limiter(1);
        let response = handle_request(request("/other", Some("42")), &limiter).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
