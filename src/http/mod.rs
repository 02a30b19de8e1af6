//! Retrying HTTP client
//!
//! Thin wrapper around a blocking reqwest client that retries transient
//! failures (timeouts, connection errors, 5xx, 429) with exponential backoff
//! and treats every other 4xx as permanent. Requests are sent from a worker
//! thread so an interrupt does not wait out the request timeout.

mod retry;

pub use retry::RetryPolicy;
pub(crate) use retry::sleep_unless_cancelled;

use retry::{CANCEL_POLL_INTERVAL, RetryAction, retry_with_backoff};
use reqwest::blocking::{Client, Response};
use reqwest::{Method, StatusCode, header};
use serde::de::DeserializeOwned;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors that can occur while talking to a remote service
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request did not complete within the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// The remote host could not be reached
    #[error("Connection failed: {0}")]
    ConnectionRefused(String),

    /// The server answered with a 5xx status
    #[error("Server error: HTTP {0}")]
    ServerError(StatusCode),

    /// The server answered with a 4xx status
    #[error("Client error: HTTP {0}")]
    ClientError(StatusCode),

    /// All attempts failed with retryable errors
    #[error("Gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: Box<HttpError> },

    /// The request could not be built or the response body could not be read
    #[error("Invalid request or response: {0}")]
    Invalid(String),

    /// The retry loop was aborted by the user
    #[error("Request cancelled")]
    Cancelled,
}

impl HttpError {
    /// Whether repeating the request later has a reasonable chance to succeed
    pub fn is_transient(&self) -> bool {
        match self {
            HttpError::Timeout
            | HttpError::ConnectionRefused(_)
            | HttpError::ServerError(_)
            | HttpError::Exhausted { .. }
            | HttpError::Cancelled => true,
            HttpError::ClientError(status) => *status == StatusCode::TOO_MANY_REQUESTS,
            HttpError::Invalid(_) => false,
        }
    }

    /// The HTTP status carried by this error, looking through exhaustion
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::ServerError(status) | HttpError::ClientError(status) => Some(*status),
            HttpError::Exhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            HttpError::Timeout
        } else if error.is_connect() || error.is_request() || error.is_body() {
            HttpError::ConnectionRefused(error.to_string())
        } else {
            HttpError::Invalid(error.to_string())
        }
    }
}

/// Blocking HTTP client with bounded automatic retry
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl HttpClient {
    /// Creates a client sending `user_agent` with every request
    ///
    /// # Arguments
    ///
    /// * `user_agent` - Value for the `User-Agent` header
    /// * `timeout` - Per-attempt request timeout
    /// * `policy` - Retry ceiling and backoff delays
    /// * `cancel` - Token aborting in-flight retry loops
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Result<Self, HttpError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| HttpError::Invalid(e.to_string()))?;

        Ok(Self {
            client,
            policy,
            cancel,
        })
    }

    /// Sends a request, retrying transient failures
    ///
    /// Only successful responses are returned; every other outcome is mapped
    /// to an [`HttpError`].
    pub fn request(&self, method: Method, url: &str) -> Result<Response, HttpError> {
        retry_with_backoff(&self.policy, &self.cancel, |attempt| {
            debug!(%method, url, attempt, "Sending request");

            let response = match self.send_unless_cancelled(&method, url) {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    let err = HttpError::from_reqwest(e);
                    return match err {
                        HttpError::Invalid(_) => RetryAction::Fail(err),
                        _ => RetryAction::Retry(err),
                    };
                }
                Err(cancelled) => return RetryAction::Fail(cancelled),
            };

            classify_status(response)
        })
    }

    /// Sends one attempt, giving up as soon as the token is cancelled
    ///
    /// The worker thread is left behind on cancellation and ends once the
    /// request completes or times out.
    fn send_unless_cancelled(
        &self,
        method: &Method,
        url: &str,
    ) -> Result<reqwest::Result<Response>, HttpError> {
        let request = self
            .client
            .request(method.clone(), url)
            .header(header::ACCEPT, "*/*");

        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let _ = sender.send(request.send());
        });

        loop {
            if self.cancel.is_cancelled() {
                debug!(url, "Request abandoned after interrupt");
                return Err(HttpError::Cancelled);
            }
            match receiver.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(result) => return Ok(result),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(HttpError::Invalid("request worker stopped".to_string()));
                }
            }
        }
    }

    /// Fetches a URL and returns the body as text
    pub fn get_text(&self, url: &str) -> Result<String, HttpError> {
        self.request(Method::GET, url)?
            .text()
            .map_err(|e| HttpError::Invalid(e.to_string()))
    }

    /// Fetches a URL and deserializes the JSON body
    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, HttpError> {
        self.request(Method::GET, url)?
            .json()
            .map_err(|e| HttpError::Invalid(e.to_string()))
    }
}

fn classify_status(response: Response) -> RetryAction<Response> {
    let status = response.status();
    if status.is_server_error() {
        RetryAction::Retry(HttpError::ServerError(status))
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        RetryAction::Retry(HttpError::ClientError(status))
    } else if status.is_client_error() {
        RetryAction::Fail(HttpError::ClientError(status))
    } else {
        RetryAction::Success(response)
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Minimal scripted HTTP server for exercising the client without network

    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// One canned reply: status code and body
    pub(crate) type Reply = (u16, String);

    /// Handle to a running stub server
    pub(crate) struct StubServer {
        pub base_url: String,
        hits: Arc<AtomicUsize>,
    }

    impl StubServer {
        /// Serves `replies` in order; once exhausted the last one repeats
        pub(crate) fn start(replies: Vec<Reply>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let base_url = format!("http://{}", listener.local_addr().unwrap());
            let hits = Arc::new(AtomicUsize::new(0));
            let counter = hits.clone();

            thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let index = counter.fetch_add(1, Ordering::SeqCst);
                    let (status, body) = replies
                        .get(index)
                        .or(replies.last())
                        .cloned()
                        .unwrap_or((500, String::new()));

                    // Drain the request head
                    let mut reader = BufReader::new(stream.try_clone().unwrap());
                    let mut line = String::new();
                    while reader.read_line(&mut line).map(|n| n > 2).unwrap_or(false) {
                        line.clear();
                    }

                    let response = format!(
                        "HTTP/1.1 {} Stub\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes());
                    let _ = stream.flush();
                }
            });

            Self { base_url, hits }
        }

        /// Number of requests received so far
        pub(crate) fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_server::StubServer;
    use super::*;
    use assert_matches::assert_matches;
    use std::net::TcpListener;
    use std::time::Instant;

    fn client(max_retries: u32) -> HttpClient {
        let policy = RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        };
        HttpClient::new(
            "tape-deck-test",
            Duration::from_secs(5),
            policy,
            CancellationToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_repeated_503_exhausts_after_ceiling() {
        let server = StubServer::start(vec![(503, String::new())]);
        let result = client(3).get_text(&server.base_url);

        assert_matches!(result, Err(HttpError::Exhausted { attempts: 4, last }) => {
            assert_matches!(*last, HttpError::ServerError(status) if status.as_u16() == 503);
        });
        assert_eq!(server.hits(), 4);
    }

    #[test]
    fn test_404_is_not_retried() {
        let server = StubServer::start(vec![(404, String::new())]);
        let result = client(3).get_text(&server.base_url);

        assert_matches!(result, Err(HttpError::ClientError(status)) if status.as_u16() == 404);
        assert_eq!(server.hits(), 1);
    }

    #[test]
    fn test_recovers_after_server_error() {
        let server = StubServer::start(vec![
            (502, String::new()),
            (200, "hello".to_string()),
        ]);
        let body = client(3).get_text(&server.base_url).unwrap();

        assert_eq!(body, "hello");
        assert_eq!(server.hits(), 2);
    }

    #[test]
    fn test_get_json_decodes_body() {
        let server = StubServer::start(vec![(200, r#"[{"tmdb_id": 7}]"#.to_string())]);
        let value: serde_json::Value = client(0).get_json(&server.base_url).unwrap();

        assert_eq!(value[0]["tmdb_id"], 7);
    }

    #[test]
    fn test_cancelled_client_sends_nothing() {
        let server = StubServer::start(vec![(200, String::new())]);
        let cancel = CancellationToken::new();
        let client = HttpClient::new(
            "tape-deck-test",
            Duration::from_secs(5),
            RetryPolicy::default(),
            cancel.clone(),
        )
        .unwrap();
        cancel.cancel();

        assert_matches!(client.get_text(&server.base_url), Err(HttpError::Cancelled));
        assert_eq!(server.hits(), 0);
    }

    #[test]
    fn test_cancel_aborts_pending_request() {
        // Accepts connections but never answers them
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        thread::spawn(move || {
            let _held: Vec<_> = listener.incoming().collect();
        });

        let cancel = CancellationToken::new();
        let client = HttpClient::new(
            "tape-deck-test",
            Duration::from_secs(10),
            RetryPolicy::default(),
            cancel.clone(),
        )
        .unwrap();

        let canceller = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            canceller.cancel();
        });

        let started = Instant::now();
        let result = client.get_text(&url);

        assert_matches!(result, Err(HttpError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_is_transient_classification() {
        assert!(HttpError::Timeout.is_transient());
        assert!(HttpError::ServerError(StatusCode::BAD_GATEWAY).is_transient());
        assert!(!HttpError::ClientError(StatusCode::NOT_FOUND).is_transient());
        assert!(HttpError::ClientError(StatusCode::TOO_MANY_REQUESTS).is_transient());
    }
}
