use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Circuit breaker states, tracked per target URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Failure bookkeeping for one URL.
#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    pub consecutive_failures: u32,
    pub last_failure_time: Option<Instant>,
    pub state: CircuitState,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            last_failure_time: None,
            state: CircuitState::Closed,
        }
    }
}

/// Retry and breaker tuning for webhook delivery.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Retries on top of the initial attempt.
    pub max_retries: u32,
    pub max_backoff: Duration,
    pub request_timeout: Duration,
    /// Jitter spread applied to backoff delays (20.0 = plus/minus 20%).
    pub jitter_percent: f64,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            max_backoff: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            jitter_percent: 20.0,
            breaker_threshold: 10,
            breaker_cooldown: Duration::from_secs(60),
        }
    }
}

/// A completed HTTP exchange. 4xx/5xx are exchanges too, not errors.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// Webhook HTTP client with retry, jittered exponential backoff, and a
/// per-URL circuit breaker.
///
/// Cloning is cheap — clones share the breaker map via Arc, so breaker state
/// survives across providers and cycles.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    settings: Arc<RetrySettings>,
    breakers: Arc<Mutex<HashMap<String, CircuitBreakerState>>>,
    dry_run: bool,
}

impl HttpClient {
    pub fn new(settings: RetrySettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mover-status/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Transport {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            settings: Arc::new(settings),
            breakers: Arc::new(Mutex::new(HashMap::new())),
            dry_run: false,
        })
    }

    /// A client that logs payloads and answers 204 without any network I/O,
    /// bypassing retries and the breaker.
    pub fn dry_run(settings: RetrySettings) -> Result<Self> {
        let mut client = Self::new(settings)?;
        client.dry_run = true;
        Ok(client)
    }

    /// One-shot POST with a wall-clock deadline.
    pub async fn post(&self, url: &str, payload: &Value, timeout: Duration) -> Result<HttpResponse> {
        if self.dry_run {
            return Ok(self.dry_run_response(url, payload));
        }

        let parsed =
            reqwest::Url::parse(url).map_err(|_| Error::MalformedUrl(url.to_string()))?;

        debug!(url, "Initiating POST request");
        let outcome = self
            .client
            .post(parsed)
            .json(payload)
            .timeout(timeout)
            .send()
            .await;

        match outcome {
            Ok(response) => {
                let status = response.status().as_u16();
                let headers = response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
                    })
                    .collect();
                let body = response.text().await.unwrap_or_default();
                Ok(HttpResponse {
                    status,
                    body,
                    headers,
                })
            }
            Err(e) if e.is_timeout() => Err(Error::Timeout {
                url: url.to_string(),
                timeout_secs: timeout.as_secs_f64(),
            }),
            Err(e) => Err(Error::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// POST with retry on transient failures.
    ///
    /// The breaker for `url` is consulted before every attempt. 429 responses
    /// honor a numeric Retry-After without advancing the backoff exponent;
    /// 5xx, timeouts, and transport errors back off exponentially; other 4xx
    /// fail immediately.
    pub async fn post_with_retry(&self, url: &str, payload: &Value) -> Result<HttpResponse> {
        if self.dry_run {
            return Ok(self.dry_run_response(url, payload));
        }

        let max_attempts = self.settings.max_retries + 1;
        let mut backoff_exponent: u32 = 0;
        let mut attempt: u32 = 0;
        let mut last_error: Option<Error> = None;

        while attempt < max_attempts {
            self.check_breaker(url)?;
            attempt += 1;

            match self.post(url, payload, self.settings.request_timeout).await {
                Ok(response) if response.is_success() => {
                    self.record_success(url);
                    debug!(url, status = response.status, attempt, "Request succeeded");
                    return Ok(response);
                }
                Ok(response) if response.status == 429 => {
                    last_error = Some(Error::ServerError {
                        url: url.to_string(),
                        status: 429,
                        attempts: attempt,
                    });
                    if let Some(retry_after) = parse_retry_after(&response.headers) {
                        let delay = retry_after.min(self.settings.max_backoff);
                        warn!(
                            url,
                            delay_secs = delay.as_secs_f64(),
                            attempt,
                            "Rate limited, honoring Retry-After"
                        );
                        if attempt < max_attempts {
                            tokio::time::sleep(delay).await;
                        }
                        // Retry-After replaces this round's backoff; the
                        // exponent stays where it was.
                        continue;
                    }
                    if attempt < max_attempts {
                        self.backoff(url, &mut backoff_exponent, "rate limited").await;
                    }
                }
                Ok(response) if response.status >= 500 => {
                    last_error = Some(Error::ServerError {
                        url: url.to_string(),
                        status: response.status,
                        attempts: attempt,
                    });
                    if attempt < max_attempts {
                        self.backoff(url, &mut backoff_exponent, "server error").await;
                    }
                }
                Ok(response) => {
                    self.record_failure(url);
                    return Err(Error::ClientError {
                        url: url.to_string(),
                        status: response.status,
                    });
                }
                Err(err @ (Error::Timeout { .. } | Error::Transport { .. })) => {
                    warn!(url, attempt, error = %err, "Request attempt failed");
                    last_error = Some(err);
                    if attempt < max_attempts {
                        self.backoff(url, &mut backoff_exponent, "transport failure").await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        self.record_failure(url);
        Err(last_error.unwrap_or_else(|| Error::Transport {
            url: url.to_string(),
            reason: "all retry attempts exhausted".to_string(),
        }))
    }

    fn dry_run_response(&self, url: &str, payload: &Value) -> HttpResponse {
        info!(url, payload = %payload, "Dry-run POST recorded");
        HttpResponse {
            status: 204,
            body: String::new(),
            headers: HashMap::new(),
        }
    }

    async fn backoff(&self, url: &str, exponent: &mut u32, reason: &str) {
        let delay = self.backoff_delay(*exponent);
        *exponent += 1;
        warn!(url, delay_secs = delay.as_secs_f64(), reason, "Retrying after backoff");
        tokio::time::sleep(delay).await;
    }

    /// Jittered exponential delay for backoff round `exponent` (0-indexed):
    /// `min(2^n, cap) * (1 + uniform(-j, +j))`, never above the cap.
    pub fn backoff_delay(&self, exponent: u32) -> Duration {
        let cap = self.settings.max_backoff.as_secs_f64();
        let base = 2f64.powi(exponent.min(30) as i32).min(cap);
        let spread = self.settings.jitter_percent / 100.0;
        let jitter = 1.0 + rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((base * jitter).clamp(0.0, cap))
    }

    // ---- Circuit breaker ----

    fn check_breaker(&self, url: &str) -> Result<()> {
        let mut breakers = self.breakers.lock().expect("breaker map poisoned");
        let Some(breaker) = breakers.get_mut(url) else {
            return Ok(());
        };
        match breaker.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let cooled_down = breaker
                    .last_failure_time
                    .map(|at| at.elapsed() >= self.settings.breaker_cooldown)
                    .unwrap_or(true);
                if cooled_down {
                    breaker.state = CircuitState::HalfOpen;
                    warn!(url, "Circuit breaker transitioned to HALF_OPEN");
                    Ok(())
                } else {
                    Err(Error::CircuitOpen {
                        url: url.to_string(),
                    })
                }
            }
        }
    }

    fn record_success(&self, url: &str) {
        let mut breakers = self.breakers.lock().expect("breaker map poisoned");
        if let Some(breaker) = breakers.get_mut(url) {
            let was = breaker.state;
            breaker.consecutive_failures = 0;
            breaker.state = CircuitState::Closed;
            if was != CircuitState::Closed {
                info!(url, "Circuit breaker transitioned to CLOSED");
            }
        }
    }

    fn record_failure(&self, url: &str) {
        let mut breakers = self.breakers.lock().expect("breaker map poisoned");
        let breaker = breakers.entry(url.to_string()).or_default();
        breaker.consecutive_failures += 1;
        breaker.last_failure_time = Some(Instant::now());
        match breaker.state {
            CircuitState::HalfOpen => {
                breaker.state = CircuitState::Open;
                warn!(
                    url,
                    failures = breaker.consecutive_failures,
                    "Circuit breaker reopened, recovery probe failed"
                );
            }
            CircuitState::Closed
                if breaker.consecutive_failures >= self.settings.breaker_threshold =>
            {
                breaker.state = CircuitState::Open;
                warn!(
                    url,
                    failures = breaker.consecutive_failures,
                    threshold = self.settings.breaker_threshold,
                    "Circuit breaker transitioned to OPEN"
                );
            }
            _ => {}
        }
    }

    /// Snapshot of the breaker for a URL (for diagnostics and tests).
    pub fn breaker_snapshot(&self, url: &str) -> Option<CircuitBreakerState> {
        self.breakers
            .lock()
            .expect("breaker map poisoned")
            .get(url)
            .cloned()
    }
}

/// Parse a numeric Retry-After header value (seconds). HTTP-date values are
/// treated as absent.
fn parse_retry_after(headers: &HashMap<String, String>) -> Option<Duration> {
    let raw = headers.get("retry-after")?;
    let seconds: f64 = raw.trim().parse().ok()?;
    if seconds < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_settings() -> RetrySettings {
        RetrySettings {
            max_retries: 5,
            max_backoff: Duration::from_millis(40),
            request_timeout: Duration::from_millis(500),
            jitter_percent: 20.0,
            breaker_threshold: 10,
            breaker_cooldown: Duration::from_millis(100),
        }
    }

    fn client(settings: RetrySettings) -> HttpClient {
        HttpClient::new(settings).unwrap()
    }

    // -----------------------------------------------------------------------
    // post
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn post_returns_completed_exchanges_including_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(418).set_body_string("teapot"))
            .mount(&server)
            .await;

        let client = client(fast_settings());
        let response = client
            .post(
                &format!("{}/hook", server.uri()),
                &json!({"k": "v"}),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 418);
        assert_eq!(response.body, "teapot");
    }

    #[tokio::test]
    async fn post_rejects_malformed_url() {
        let client = client(fast_settings());
        let err = client
            .post("not a url", &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedUrl(_)));
    }

    #[tokio::test]
    async fn post_times_out_on_slow_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = client(fast_settings());
        let err = client
            .post(&server.uri(), &json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn post_maps_connection_refused_to_transport() {
        let client = client(fast_settings());
        // Port 1 is never listening.
        let err = client
            .post("http://127.0.0.1:1/hook", &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }

    // -----------------------------------------------------------------------
    // post_with_retry
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn retry_recovers_from_503() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client(fast_settings());
        let url = format!("{}/hook", server.uri());
        let response = client.post_with_retry(&url, &json!({})).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
        assert_eq!(
            client.breaker_snapshot(&url).unwrap().consecutive_failures,
            0
        );
    }

    #[tokio::test]
    async fn retry_honors_retry_after_seconds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("Retry-After", "0"),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client(fast_settings());
        let response = client
            .post_with_retry(&format!("{}/hook", server.uri()), &json!({}))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn client_errors_do_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let client = client(fast_settings());
        let url = format!("{}/hook", server.uri());
        let err = client.post_with_retry(&url, &json!({})).await.unwrap_err();

        assert!(matches!(err, Error::ClientError { status: 400, .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert_eq!(
            client.breaker_snapshot(&url).unwrap().consecutive_failures,
            1
        );
    }

    #[tokio::test]
    async fn exhausted_retries_record_one_breaker_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let settings = RetrySettings {
            max_retries: 2,
            ..fast_settings()
        };
        let client = client(settings);
        let url = format!("{}/hook", server.uri());
        let err = client.post_with_retry(&url, &json!({})).await.unwrap_err();

        assert!(matches!(err, Error::ServerError { status: 503, .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
        assert_eq!(
            client.breaker_snapshot(&url).unwrap().consecutive_failures,
            1
        );
    }

    // -----------------------------------------------------------------------
    // backoff
    // -----------------------------------------------------------------------

    #[test]
    fn backoff_delay_stays_within_jitter_band_and_cap() {
        let settings = RetrySettings {
            max_backoff: Duration::from_secs(60),
            ..Default::default()
        };
        let client = HttpClient::new(settings).unwrap();
        let cap = 60.0;

        for exponent in 0..8u32 {
            let base = 2f64.powi(exponent as i32).min(cap);
            for _ in 0..50 {
                let delay = client.backoff_delay(exponent).as_secs_f64();
                assert!(delay >= base * 0.8 - 1e-9, "n={exponent} delay={delay}");
                assert!(delay <= (base * 1.2).min(cap) + 1e-9, "n={exponent} delay={delay}");
            }
        }
    }

    // -----------------------------------------------------------------------
    // circuit breaker
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_recovers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(10)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let settings = RetrySettings {
            max_retries: 0,
            breaker_threshold: 10,
            breaker_cooldown: Duration::from_millis(50),
            ..fast_settings()
        };
        let client = client(settings);
        let url = format!("{}/hook", server.uri());

        for _ in 0..10 {
            let _ = client.post_with_retry(&url, &json!({})).await.unwrap_err();
        }
        let snapshot = client.breaker_snapshot(&url).unwrap();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.consecutive_failures, 10);

        // Open circuit rejects without touching the network.
        let before = server.received_requests().await.unwrap().len();
        let err = client.post_with_retry(&url, &json!({})).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), before);

        // After the cooldown a half-open probe goes through and closes it.
        tokio::time::sleep(Duration::from_millis(60)).await;
        let response = client.post_with_retry(&url, &json!({})).await.unwrap();
        assert_eq!(response.status, 200);
        let snapshot = client.breaker_snapshot(&url).unwrap();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let settings = RetrySettings {
            max_retries: 0,
            breaker_threshold: 2,
            breaker_cooldown: Duration::from_millis(30),
            ..fast_settings()
        };
        let client = client(settings);
        let url = format!("{}/hook", server.uri());

        for _ in 0..2 {
            let _ = client.post_with_retry(&url, &json!({})).await.unwrap_err();
        }
        assert_eq!(client.breaker_snapshot(&url).unwrap().state, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        // Probe runs (server still failing) and the breaker reopens.
        let _ = client.post_with_retry(&url, &json!({})).await.unwrap_err();
        assert_eq!(client.breaker_snapshot(&url).unwrap().state, CircuitState::Open);
    }

    #[tokio::test]
    async fn independent_urls_have_independent_breakers() {
        let client = client(RetrySettings {
            max_retries: 0,
            breaker_threshold: 1,
            ..fast_settings()
        });
        let _ = client
            .post_with_retry("http://127.0.0.1:1/a", &json!({}))
            .await
            .unwrap_err();

        assert_eq!(
            client
                .breaker_snapshot("http://127.0.0.1:1/a")
                .unwrap()
                .state,
            CircuitState::Open
        );
        assert!(client.breaker_snapshot("http://127.0.0.1:1/b").is_none());
    }

    // -----------------------------------------------------------------------
    // dry run
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn dry_run_answers_204_without_network() {
        let client = HttpClient::dry_run(fast_settings()).unwrap();
        let response = client
            .post_with_retry("http://127.0.0.1:1/unreachable", &json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(response.status, 204);
        assert!(response.body.is_empty());
        assert!(client.breaker_snapshot("http://127.0.0.1:1/unreachable").is_none());
    }

    // -----------------------------------------------------------------------
    // Retry-After parsing
    // -----------------------------------------------------------------------

    #[test]
    fn retry_after_parses_numeric_seconds() {
        let mut headers = HashMap::new();
        headers.insert("retry-after".to_string(), "2".to_string());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(2)));
    }

    #[test]
    fn retry_after_ignores_http_dates_and_garbage() {
        let mut headers = HashMap::new();
        headers.insert(
            "retry-after".to_string(),
            "Wed, 21 Oct 2026 07:28:00 GMT".to_string(),
        );
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert("retry-after".to_string(), "-5".to_string());
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn retry_after_absent() {
        assert_eq!(parse_retry_after(&HashMap::new()), None);
    }
}
