// Shared REST plumbing for the vendor clients.
//
// Wraps one `HttpSession` + base URL + `ConnectionTracker`. Every request
// reports into the tracker: transport failures and non-2xx statuses flip
// the link, malformed bodies do not. Successful bodies are broadcast as
// `ClientEvent::Response` tagged with the request kind.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::auth::TokenSlot;
use crate::connection::{ClientEvent, ConnectionTracker, RequestKind};
use crate::error::Error;
use crate::transport::HttpSession;

/// Bounded retry for responses that never arrived or were rate limited.
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Where the access token goes on each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPlacement {
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// A vendor header carrying the raw token.
    Header(&'static str),
    /// First path segment after the base path (`/api/v1/<token>/...`).
    /// Spliced in after logging so the token never reaches the logs.
    PathPrefix,
}

pub struct RestClient {
    session: HttpSession,
    base_url: Url,
    tracker: ConnectionTracker,
    credential: Option<(Arc<TokenSlot>, TokenPlacement)>,
}

impl RestClient {
    pub fn new(session: HttpSession, base_url: Url, tracker: ConnectionTracker) -> Self {
        Self {
            session,
            base_url,
            tracker,
            credential: None,
        }
    }

    /// Attach `slot`'s token to every request once it is set.
    #[must_use]
    pub fn with_credential(mut self, slot: Arc<TokenSlot>, placement: TokenPlacement) -> Self {
        self.credential = Some((slot, placement));
        self
    }

    pub fn session(&self) -> &HttpSession {
        &self.session
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Join a relative path onto the base URL.
    pub fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    /// Start a request with the session timeout and credential applied.
    pub fn builder(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.stream_builder(method, url)
            .timeout(self.session.timeout())
    }

    /// Like [`builder`](Self::builder) but without a total timeout, for
    /// long-lived streaming reads.
    pub fn stream_builder(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let url = self.splice_path_token(url);
        self.authorize(self.session.client().request(method, url))
    }

    fn splice_path_token(&self, url: Url) -> Url {
        let Some((slot, TokenPlacement::PathPrefix)) = &self.credential else {
            return url;
        };
        let Some(token) = slot.get() else {
            return url;
        };
        let base_path = self.base_url.path();
        match url.path().strip_prefix(base_path) {
            Some(rest) => {
                let mut spliced = url.clone();
                spliced.set_path(&format!("{base_path}{}/{rest}", token.expose_secret()));
                spliced
            }
            None => url,
        }
    }

    /// Attach the credential, if any, to a request built elsewhere.
    pub fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let Some((slot, placement)) = &self.credential else {
            return builder;
        };
        if !slot.is_set() {
            return builder;
        }
        let header = match placement {
            TokenPlacement::Bearer => slot.bearer().map(|v| ("authorization", v)),
            TokenPlacement::Header(name) => slot.raw_header().map(|v| (*name, v)),
            TokenPlacement::PathPrefix => return builder,
        };
        match header {
            Ok((name, value)) => builder.header(name, value),
            Err(e) => {
                warn!(error = %e, "credential not attached");
                builder
            }
        }
    }

    /// Issue one request with an optional JSON body and parse the reply.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        kind: RequestKind,
    ) -> Result<Value, Error> {
        let url = self.url(path)?;
        debug!("{method} {url}");

        let mut builder = self.builder(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.execute(builder, kind).await
    }

    /// One request that bypasses the tracker.
    ///
    /// Pairing polls expect rejections until the user presses the button;
    /// those must not read as connection problems.
    pub async fn probe(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, Error> {
        let url = self.url(path)?;
        debug!("{method} {url} (probe)");

        let mut builder = self.builder(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.probe_with(builder).await
    }

    /// Untracked send of a prepared request.
    pub async fn probe_with(&self, builder: reqwest::RequestBuilder) -> Result<Value, Error> {
        let resp = self.send(builder).await?;
        let body = resp.text().await?;
        parse_body(&body)
    }

    /// Like [`request`](Self::request) but retries up to three times when
    /// no response arrived or the bridge answered 429.
    pub async fn request_with_retry(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        kind: RequestKind,
    ) -> Result<Value, Error> {
        let url = self.url(path)?;
        let mut attempt = 1;
        loop {
            debug!(attempt, "{method} {url}");
            let mut builder = self.builder(method.clone(), url.clone());
            if let Some(body) = body {
                builder = builder.json(body);
            }

            match self.send(builder).await {
                Err(e) if attempt < RETRY_ATTEMPTS && retryable(&e) => {
                    warn!(error = %e, attempt, "request failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                result => return self.finish(result, kind).await,
            }
        }
    }

    /// Send a prepared request and run it through the tracker.
    pub async fn execute(
        &self,
        builder: reqwest::RequestBuilder,
        kind: RequestKind,
    ) -> Result<Value, Error> {
        self.complete(builder.send().await, kind).await
    }

    /// Run an already-sent request through status mapping and the tracker.
    ///
    /// For callers that must look at a response (e.g. a 401 challenge)
    /// before deciding to hand it over.
    pub async fn complete(
        &self,
        sent: Result<reqwest::Response, reqwest::Error>,
        kind: RequestKind,
    ) -> Result<Value, Error> {
        let result = match sent {
            Ok(resp) => check_status(resp).await,
            Err(e) => Err(Error::Transport(e)),
        };
        self.finish(result, kind).await
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        check_status(builder.send().await?).await
    }

    async fn finish(
        &self,
        result: Result<reqwest::Response, Error>,
        kind: RequestKind,
    ) -> Result<Value, Error> {
        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                self.tracker.failed(&e);
                return Err(e);
            }
        };

        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                let err = Error::Transport(e);
                self.tracker.failed(&err);
                return Err(err);
            }
        };
        let payload = match parse_body(&body) {
            Ok(payload) => payload,
            Err(e) => {
                // A malformed first reply leaves the link "never connected".
                warn!(error = %e, %kind, "malformed response body");
                self.tracker.failed(&e);
                return Err(e);
            }
        };
        self.tracker.succeeded();
        self.tracker.emit(ClientEvent::Response {
            kind,
            payload: Arc::new(payload.clone()),
        });
        Ok(payload)
    }
}

/// Map non-2xx statuses onto errors; 401/403 are authentication failures.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(Error::Authentication {
            message: format!("HTTP {status}: {body}"),
        });
    }
    Err(Error::HttpStatus {
        status: status.as_u16(),
        body,
    })
}

/// Empty bodies are `null`; anything else must be JSON.
pub fn parse_body(body: &str) -> Result<Value, Error> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: body.to_owned(),
    })
}

fn retryable(err: &Error) -> bool {
    match err {
        Error::Transport(e) => e.is_connect() || e.is_request() || e.status().is_none(),
        Error::HttpStatus { status, .. } => *status == 429,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_parses_to_null() {
        assert_eq!(parse_body("  ").unwrap(), Value::Null);
    }

    #[test]
    fn malformed_body_keeps_raw_text() {
        let err = parse_body("{oops").unwrap_err();
        match err {
            Error::Deserialization { body, .. } => assert_eq!(body, "{oops"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn path_token_is_spliced_after_base() {
        let slot = Arc::new(TokenSlot::new(Some("tok".into())));
        let base = Url::parse("http://10.0.0.9:16021/api/v1/").unwrap();
        let session = HttpSession::from_client(reqwest::Client::new(), Default::default());
        let rest = RestClient::new(session, base, ConnectionTracker::new())
            .with_credential(slot, TokenPlacement::PathPrefix);

        let url = rest.splice_path_token(rest.url("state").unwrap());
        assert_eq!(url.as_str(), "http://10.0.0.9:16021/api/v1/tok/state");
    }

    #[test]
    fn only_missing_responses_and_429_retry() {
        assert!(retryable(&Error::HttpStatus { status: 429, body: String::new() }));
        assert!(!retryable(&Error::HttpStatus { status: 500, body: String::new() }));
        assert!(!retryable(&Error::Authentication { message: String::new() }));
    }
}
