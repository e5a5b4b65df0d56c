//! Authentication gate
//!
//! Every inbound request passes through [`AuthGate::handle`]. The three
//! handshake paths are answered locally; every other path is forwarded only
//! when it carries a valid session cookie. The handshake keeps no server-side
//! state between requests: the session lives entirely in the signed cookie.
//!
//! ```text
//! /oauth2/sign_in, /oauth2/start ─► 302 provider login            (AwaitingCallback)
//! /oauth2/callback ─► error param?         ─► 403                  (Denied)
//!                  ─► not exactly one code ─► 500                  (Denied)
//!                  ─► redeem fails         ─► 500                  (Denied)
//!                  ─► validator rejects    ─► 403, no cookie       (Denied)
//!                  ─► approved             ─► Set-Cookie, 302 /    (Authenticated)
//! anything else ─► cookie verifies         ─► forward upstream     (Authenticated)
//!               ─► missing / invalid       ─► clear, sign-in 403   (Unauthenticated)
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use identity::{IdentityValidator, Principal};
use oauth_client::OAuthClient;
use session_cookie::CookieCodec;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::error::GateError;
use crate::metrics;
use crate::pages;
use crate::proxy::{Forward, overwrite_header};

pub const SIGN_IN_PATH: &str = "/oauth2/sign_in";
pub const START_PATH: &str = "/oauth2/start";
pub const CALLBACK_PATH: &str = "/oauth2/callback";

/// Session payload when the provider did not report an email
pub const AUTHENTICATED_SENTINEL: &str = "authenticated";

/// Set from the verified session; client-supplied values never pass through
pub const FORWARDED_EMAIL_HEADER: &str = "x-forwarded-email";

/// How far in the past a cleared cookie's `Expires` is set
const CLEAR_COOKIE_AGE: Duration = Duration::from_secs(60 * 60);

/// Which part of the gate a path belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Start,
    Callback,
    Protected,
}

impl Endpoint {
    pub fn from_path(path: &str) -> Self {
        match path {
            SIGN_IN_PATH | START_PATH => Self::Start,
            CALLBACK_PATH => Self::Callback,
            _ => Self::Protected,
        }
    }
}

/// Where a single request ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    /// Sent to the provider; nothing is recorded until the callback arrives
    AwaitingCallback,
    Authenticated { payload: String },
    Denied,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::AwaitingCallback => "awaiting_callback",
            Self::Authenticated { .. } => "authenticated",
            Self::Denied => "denied",
        }
    }
}

/// Extract the authorization code from a callback query string.
///
/// Any `error` parameter wins. Otherwise exactly one non-empty `code` must be
/// present.
pub fn inspect_callback(query: &str) -> Result<String, GateError> {
    let mut codes = Vec::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "error" => return Err(GateError::ProviderDenied(value.into_owned())),
            "code" => codes.push(value.into_owned()),
            _ => {}
        }
    }
    match codes.as_slice() {
        [code] if !code.is_empty() => Ok(code.clone()),
        _ => Err(GateError::MalformedCallback),
    }
}

/// Verify the session cookie value, if any. Returns the signed payload.
pub fn check_session(
    codec: &CookieCodec,
    cookie: Option<&str>,
    now: SystemTime,
) -> Result<String, GateError> {
    let token = cookie.ok_or(GateError::MissingSession)?;
    Ok(codec.open(token, now)?)
}

/// Per-request authentication state machine in front of the upstreams.
pub struct AuthGate {
    oauth: OAuthClient,
    codec: CookieCodec,
    cookie_domain: Option<String>,
    secure: bool,
    validator: Arc<dyn IdentityValidator>,
    upstream: Arc<dyn Forward>,
    sign_in_message: Option<String>,
}

impl AuthGate {
    /// Cookies are marked `Secure` when the callback URL is https.
    pub fn new(
        oauth: OAuthClient,
        codec: CookieCodec,
        validator: Arc<dyn IdentityValidator>,
        upstream: Arc<dyn Forward>,
    ) -> Self {
        let secure = oauth.config().redirect_url.scheme() == "https";
        Self {
            oauth,
            codec,
            cookie_domain: None,
            secure,
            validator,
            upstream,
            sign_in_message: None,
        }
    }

    /// Use `domain` for cookies whenever the request host ends with it.
    pub fn with_cookie_domain(mut self, domain: Option<String>) -> Self {
        self.cookie_domain = domain.filter(|d| !d.is_empty());
        self
    }

    pub fn with_sign_in_message(mut self, message: Option<String>) -> Self {
        self.sign_in_message = message;
        self
    }

    pub fn validator_id(&self) -> &str {
        self.validator.id()
    }

    #[instrument(
        skip_all,
        fields(
            request_id = %request_id,
            method = %request.method(),
            path = %request.uri().path(),
            remote_addr = %remote_addr(&request),
        )
    )]
    pub async fn handle(&self, request: Request<Body>, request_id: String) -> Response {
        let now = SystemTime::now();
        let (state, response) = match Endpoint::from_path(request.uri().path()) {
            Endpoint::Start => (SessionState::AwaitingCallback, self.start(&request, now)),
            Endpoint::Callback => self.callback(request, now).await,
            Endpoint::Protected => self.protected(request, request_id, now).await,
        };
        debug!(state = state.label(), status = response.status().as_u16(), "gate decision");
        metrics::record_gate_decision(state.label());
        response
    }

    /// Redirect to the provider, dropping any session cookie the browser still holds.
    fn start(&self, request: &Request<Body>, now: SystemTime) -> Response {
        let login = self.oauth.authorization_url();
        let mut jar = CookieJar::new();
        if CookieJar::from_headers(request.headers())
            .get(self.codec.name())
            .is_some()
        {
            jar = jar.add(self.clear_cookie(request_host(request), now));
        }
        (StatusCode::FOUND, jar, [(header::LOCATION, login.as_str())]).into_response()
    }

    async fn callback(&self, request: Request<Body>, now: SystemTime) -> (SessionState, Response) {
        let query = request.uri().query().unwrap_or("");
        match self.complete_handshake(query, request_host(&request), now).await {
            Ok((payload, response)) => (SessionState::Authenticated { payload }, response),
            Err(e) => {
                warn!(error = %e, "oauth callback failed");
                let response = pages::error_page(e.status(), e.title(), &e.public_message());
                (SessionState::Denied, response)
            }
        }
    }

    /// Redeem the code, run the validator and issue the session cookie.
    ///
    /// The cookie is only built after the validator approves.
    async fn complete_handshake(
        &self,
        query: &str,
        host: Option<&str>,
        now: SystemTime,
    ) -> Result<(String, Response), GateError> {
        let code = inspect_callback(query)?;

        let redemption = match self.oauth.redeem(&code).await {
            Ok(r) => {
                metrics::record_redemption("ok");
                r
            }
            Err(e) => {
                metrics::record_redemption("error");
                return Err(e.into());
            }
        };

        let principal = Principal::new(redemption.access_token, redemption.email);
        if !self.validator.validate(&principal).await {
            return Err(GateError::ValidationDenied(self.validator.id().to_string()));
        }

        let payload = principal
            .email
            .clone()
            .unwrap_or_else(|| AUTHENTICATED_SENTINEL.to_string());
        let token = self.codec.seal(&payload, now);
        let jar = CookieJar::new().add(self.session_cookie(token, host, now));
        info!(email = ?principal.email, "authentication complete");

        let response = (StatusCode::FOUND, jar, [(header::LOCATION, "/")]).into_response();
        Ok((payload, response))
    }

    async fn protected(
        &self,
        mut request: Request<Body>,
        request_id: String,
        now: SystemTime,
    ) -> (SessionState, Response) {
        let jar = CookieJar::from_headers(request.headers());
        let presented = jar.get(self.codec.name()).map(|c| c.value().to_string());

        match check_session(&self.codec, presented.as_deref(), now) {
            Ok(payload) => {
                let email = (payload != AUTHENTICATED_SENTINEL).then_some(payload.as_str());
                overwrite_header(request.headers_mut(), FORWARDED_EMAIL_HEADER, email);
                let response = self.upstream.forward(request, request_id).await;
                (SessionState::Authenticated { payload }, response)
            }
            Err(e) => {
                debug!(reason = %e, "request has no valid session");
                let page = pages::sign_in_page(StatusCode::FORBIDDEN, self.sign_in_message.as_deref());
                let response = if presented.is_some() {
                    let clear = self.clear_cookie(request_host(&request), now);
                    (CookieJar::new().add(clear), page).into_response()
                } else {
                    page
                };
                (SessionState::Unauthenticated, response)
            }
        }
    }

    fn session_cookie(&self, value: String, host: Option<&str>, now: SystemTime) -> Cookie<'static> {
        self.build_cookie(value, host, now + self.codec.max_age())
    }

    fn clear_cookie(&self, host: Option<&str>, now: SystemTime) -> Cookie<'static> {
        let expires = now.checked_sub(CLEAR_COOKIE_AGE).unwrap_or(SystemTime::UNIX_EPOCH);
        self.build_cookie(String::new(), host, expires)
    }

    fn build_cookie(&self, value: String, host: Option<&str>, expires: SystemTime) -> Cookie<'static> {
        let mut cookie = Cookie::build((self.codec.name().to_string(), value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .expires(OffsetDateTime::from(expires));
        if let Some(domain) = self.cookie_domain_for(host) {
            cookie = cookie.domain(domain);
        }
        cookie.build()
    }

    /// The configured override when the host ends with it, else the bare host.
    /// IP hosts get a host-only cookie.
    fn cookie_domain_for(&self, host: Option<&str>) -> Option<String> {
        let host = strip_port(host?)?;
        if let Some(domain) = &self.cookie_domain {
            if host.ends_with(domain.as_str()) {
                return Some(domain.clone());
            }
        }
        if host.is_empty() || host.parse::<IpAddr>().is_ok() {
            return None;
        }
        Some(host.to_string())
    }
}

/// Host without port. Bracketed IPv6 literals yield `None`.
fn strip_port(host: &str) -> Option<&str> {
    if host.starts_with('[') {
        return None;
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => Some(name),
        _ => Some(host),
    }
}

fn request_host(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| request.uri().host())
}

/// `X-Real-IP` when a fronting proxy set it, else the peer address.
fn remote_addr(request: &Request<Body>) -> String {
    if let Some(ip) = request
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
    {
        return ip.to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Secret;
    use oauth_client::OAuthConfig;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    const SEED: &str = "cookie-seed-for-tests";

    /// Records every request it is handed and answers 200.
    #[derive(Default)]
    struct RecordingForwarder {
        seen: Mutex<Vec<Request<()>>>,
    }

    impl RecordingForwarder {
        fn count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl Forward for RecordingForwarder {
        fn forward(
            &self,
            request: Request<Body>,
            _request_id: String,
        ) -> Pin<Box<dyn Future<Output = Response> + Send + '_>> {
            let (parts, _body) = request.into_parts();
            self.seen.lock().unwrap().push(Request::from_parts(parts, ()));
            Box::pin(async { (StatusCode::OK, "from upstream").into_response() })
        }
    }

    /// Fixed answer; remembers the emails it was asked about.
    struct StaticValidator {
        approve: bool,
        seen: Mutex<Vec<Option<String>>>,
    }

    impl StaticValidator {
        fn new(approve: bool) -> Self {
            Self {
                approve,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl IdentityValidator for StaticValidator {
        fn id(&self) -> &str {
            "static"
        }

        fn validate<'a>(
            &'a self,
            principal: &'a Principal,
        ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
            self.seen.lock().unwrap().push(principal.email.clone());
            let approve = self.approve;
            Box::pin(async move { approve })
        }
    }

    /// Mock provider token endpoint answering every POST with `status` and `body`.
    async fn start_provider(status: StatusCode, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let app = axum::Router::new().route(
                "/token",
                axum::routing::post(move || async move {
                    (status, [(header::CONTENT_TYPE, "application/json")], body)
                }),
            );
            axum::serve(listener, app).await.unwrap();
        });
        url
    }

    fn codec() -> CookieCodec {
        CookieCodec::new(
            "_oauthproxy",
            Secret::new(SEED.to_string()),
            Duration::from_secs(7 * 24 * 60 * 60),
        )
    }

    fn gate(
        provider: &str,
        validator: Arc<StaticValidator>,
    ) -> (AuthGate, Arc<RecordingForwarder>) {
        let config = OAuthConfig {
            client_id: "client-123".into(),
            client_secret: Secret::new("client-secret".into()),
            login_url: "https://provider.test/oauth2/auth".parse().unwrap(),
            redemption_url: format!("{provider}/token").parse().unwrap(),
            redirect_url: "https://app.example.com/oauth2/callback".parse().unwrap(),
            scope: "email".into(),
        };
        let oauth = OAuthClient::new(reqwest::Client::new(), config, Duration::from_secs(5));
        let forwarder = Arc::new(RecordingForwarder::default());
        let gate = AuthGate::new(oauth, codec(), validator, forwarder.clone())
            .with_sign_in_message(Some("Authenticate using example.com".into()));
        (gate, forwarder)
    }

    fn unreachable_gate() -> (AuthGate, Arc<RecordingForwarder>) {
        gate("http://127.0.0.1:1", Arc::new(StaticValidator::new(true)))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::HOST, "app.example.com")
            .body(Body::empty())
            .unwrap()
    }

    fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::HOST, "app.example.com")
            .header(header::COOKIE, format!("_oauthproxy={cookie}"))
            .body(Body::empty())
            .unwrap()
    }

    fn set_cookie(response: &Response) -> Option<Cookie<'static>> {
        response
            .headers()
            .get(header::SET_COOKIE)
            .map(|v| Cookie::parse_encoded(v.to_str().unwrap().to_string()).unwrap())
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn endpoints_are_fixed_paths() {
        assert_eq!(Endpoint::from_path("/oauth2/sign_in"), Endpoint::Start);
        assert_eq!(Endpoint::from_path("/oauth2/start"), Endpoint::Start);
        assert_eq!(Endpoint::from_path("/oauth2/callback"), Endpoint::Callback);
        assert_eq!(Endpoint::from_path("/oauth2/callback/"), Endpoint::Protected);
        assert_eq!(Endpoint::from_path("/"), Endpoint::Protected);
    }

    #[test]
    fn inspect_callback_cases() {
        assert_eq!(inspect_callback("code=abc").unwrap(), "abc");
        assert_eq!(inspect_callback("code=a%2Fb&scope=email").unwrap(), "a/b");
        assert!(matches!(
            inspect_callback("error=access_denied"),
            Err(GateError::ProviderDenied(reason)) if reason == "access_denied"
        ));
        assert!(matches!(
            inspect_callback("code=abc&error=access_denied"),
            Err(GateError::ProviderDenied(_))
        ));
        for bad in ["", "code=", "code=a&code=b", "state=xyz"] {
            assert!(
                matches!(inspect_callback(bad), Err(GateError::MalformedCallback)),
                "{bad:?} must be malformed"
            );
        }
    }

    #[test]
    fn check_session_cases() {
        let codec = codec();
        let now = SystemTime::now();
        assert!(matches!(
            check_session(&codec, None, now),
            Err(GateError::MissingSession)
        ));
        assert!(matches!(
            check_session(&codec, Some("garbage"), now),
            Err(GateError::SessionInvalid(_))
        ));
        let token = codec.seal("alice@example.com", now);
        assert_eq!(
            check_session(&codec, Some(&token), now).unwrap(),
            "alice@example.com"
        );
    }

    #[test]
    fn state_labels() {
        assert_eq!(SessionState::Unauthenticated.label(), "unauthenticated");
        assert_eq!(SessionState::AwaitingCallback.label(), "awaiting_callback");
        assert_eq!(
            SessionState::Authenticated {
                payload: "x".into()
            }
            .label(),
            "authenticated"
        );
        assert_eq!(SessionState::Denied.label(), "denied");
    }

    #[tokio::test]
    async fn start_and_sign_in_redirect_to_provider() {
        let (gate, forwarder) = unreachable_gate();
        for path in [START_PATH, SIGN_IN_PATH] {
            let response = gate.handle(get(path), "req_test".into()).await;
            assert_eq!(response.status(), StatusCode::FOUND);
            let location = url::Url::parse(
                response.headers()[header::LOCATION].to_str().unwrap(),
            )
            .unwrap();
            assert_eq!(location.host_str(), Some("provider.test"));
            let params: Vec<(String, String)> = location.query_pairs().into_owned().collect();
            assert!(params.contains(&("client_id".into(), "client-123".into())));
            assert!(params.contains(&("response_type".into(), "code".into())));
            assert!(params.contains(&(
                "redirect_uri".into(),
                "https://app.example.com/oauth2/callback".into()
            )));
            assert!(set_cookie(&response).is_none());
        }
        assert_eq!(forwarder.count(), 0);
    }

    #[tokio::test]
    async fn start_clears_existing_session() {
        let (gate, _) = unreachable_gate();
        let token = codec().seal("alice@example.com", SystemTime::now());
        let response = gate
            .handle(get_with_cookie(START_PATH, &token), "req_test".into())
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let cleared = set_cookie(&response).expect("stale session must be cleared");
        assert_eq!(cleared.value(), "");
    }

    #[tokio::test]
    async fn callback_with_provider_error_is_403() {
        let (gate, forwarder) = unreachable_gate();
        let response = gate
            .handle(get("/oauth2/callback?error=access_denied"), "req_test".into())
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(set_cookie(&response).is_none());
        let body = body_text(response).await;
        assert!(body.contains("Permission Denied"));
        assert!(body.contains("access_denied"));
        assert_eq!(forwarder.count(), 0);
    }

    #[tokio::test]
    async fn callback_without_single_code_is_500() {
        let (gate, _) = unreachable_gate();
        for uri in ["/oauth2/callback", "/oauth2/callback?code=a&code=b"] {
            let response = gate.handle(get(uri), "req_test".into()).await;
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{uri}");
            assert!(set_cookie(&response).is_none());
        }
    }

    #[tokio::test]
    async fn failed_redemption_is_500() {
        let provider = start_provider(StatusCode::UNAUTHORIZED, r#"{"error":"invalid_grant"}"#).await;
        let validator = Arc::new(StaticValidator::new(true));
        let (gate, _) = gate(&provider, validator.clone());

        let response = gate
            .handle(get("/oauth2/callback?code=abc"), "req_test".into())
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(set_cookie(&response).is_none());
        assert!(
            validator.seen.lock().unwrap().is_empty(),
            "validator must not run after a failed redemption"
        );
    }

    #[tokio::test]
    async fn approved_callback_sets_signed_cookie_and_redirects_home() {
        let provider = start_provider(
            StatusCode::OK,
            r#"{"access_token":"at_123","email":"alice@example.com"}"#,
        )
        .await;
        let validator = Arc::new(StaticValidator::new(true));
        let (gate, _) = gate(&provider, validator.clone());

        let response = gate
            .handle(get("/oauth2/callback?code=abc"), "req_test".into())
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/");

        let cookie = set_cookie(&response).expect("session cookie must be issued");
        assert_eq!(cookie.name(), "_oauthproxy");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.domain(), Some("app.example.com"));
        let expires = cookie.expires_datetime().expect("Expires must be set");
        let lifetime = expires - OffsetDateTime::now_utc();
        assert!(lifetime > time::Duration::days(6) && lifetime <= time::Duration::days(7));

        assert_eq!(
            codec().open(cookie.value(), SystemTime::now()).unwrap(),
            "alice@example.com"
        );
        assert!(!cookie.value().contains("at_123"), "access token stays out of the cookie");
        assert_eq!(
            *validator.seen.lock().unwrap(),
            vec![Some("alice@example.com".to_string())]
        );
    }

    #[tokio::test]
    async fn callback_without_email_signs_sentinel() {
        let provider = start_provider(StatusCode::OK, r#"{"access_token":"at_123"}"#).await;
        let (gate, _) = gate(&provider, Arc::new(StaticValidator::new(true)));

        let response = gate
            .handle(get("/oauth2/callback?code=abc"), "req_test".into())
            .await;
        let cookie = set_cookie(&response).unwrap();
        assert_eq!(
            codec().open(cookie.value(), SystemTime::now()).unwrap(),
            AUTHENTICATED_SENTINEL
        );
    }

    #[tokio::test]
    async fn denied_principal_gets_403_and_no_cookie() {
        let provider = start_provider(
            StatusCode::OK,
            r#"{"access_token":"at_123","email":"mallory@evil.test"}"#,
        )
        .await;
        let (gate, forwarder) = gate(&provider, Arc::new(StaticValidator::new(false)));

        let response = gate
            .handle(get("/oauth2/callback?code=abc"), "req_test".into())
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(set_cookie(&response).is_none());
        assert!(body_text(response).await.contains("Invalid Account"));
        assert_eq!(forwarder.count(), 0);
    }

    #[tokio::test]
    async fn request_without_cookie_gets_sign_in_page() {
        let (gate, forwarder) = unreachable_gate();
        let response = gate.handle(get("/foo"), "req_test".into()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(set_cookie(&response).is_none(), "nothing to clear");
        let body = body_text(response).await;
        assert!(body.contains("href=\"/oauth2/start\""));
        assert!(body.contains("Authenticate using example.com"));
        assert_eq!(forwarder.count(), 0);
    }

    #[tokio::test]
    async fn valid_cookie_is_forwarded_with_verified_email() {
        let (gate, forwarder) = unreachable_gate();
        let token = codec().seal("alice@example.com", SystemTime::now());

        let mut request = get_with_cookie("/foo?x=1", &token);
        request
            .headers_mut()
            .insert(FORWARDED_EMAIL_HEADER, "admin@example.com".parse().unwrap());
        *request.method_mut() = axum::http::Method::POST;

        let response = gate.handle(request, "req_test".into()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "from upstream");

        let seen = forwarder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method(), axum::http::Method::POST);
        assert_eq!(seen[0].uri(), "/foo?x=1");
        assert_eq!(seen[0].headers()[FORWARDED_EMAIL_HEADER], "alice@example.com");
    }

    #[tokio::test]
    async fn sentinel_session_strips_client_email_header() {
        let (gate, forwarder) = unreachable_gate();
        let token = codec().seal(AUTHENTICATED_SENTINEL, SystemTime::now());

        let mut request = get_with_cookie("/foo", &token);
        request
            .headers_mut()
            .insert(FORWARDED_EMAIL_HEADER, "admin@example.com".parse().unwrap());

        let response = gate.handle(request, "req_test".into()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let seen = forwarder.seen.lock().unwrap();
        assert!(seen[0].headers().get(FORWARDED_EMAIL_HEADER).is_none());
    }

    #[tokio::test]
    async fn invalid_cookies_are_cleared_and_never_forwarded() {
        let (gate, forwarder) = unreachable_gate();
        let now = SystemTime::now();
        let valid = codec().seal("alice@example.com", now);
        let mut tampered = valid.clone().into_bytes();
        tampered[2] ^= 0x01;
        let expired = codec().seal(
            "alice@example.com",
            now - Duration::from_secs(8 * 24 * 60 * 60),
        );
        let rotated = CookieCodec::new(
            "_oauthproxy",
            Secret::new("old-seed".into()),
            Duration::from_secs(7 * 24 * 60 * 60),
        )
        .seal("alice@example.com", now);

        for cookie in [
            String::from_utf8(tampered).unwrap(),
            expired,
            rotated,
            "not|a|token".to_string(),
        ] {
            let response = gate
                .handle(get_with_cookie("/foo", &cookie), "req_test".into())
                .await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{cookie}");
            let cleared = set_cookie(&response).expect("stale cookie must be cleared");
            assert_eq!(cleared.value(), "");
            assert!(cleared.expires_datetime().unwrap() < OffsetDateTime::now_utc());
        }
        assert_eq!(forwarder.count(), 0);
    }

    #[test]
    fn cookie_domain_rules() {
        let (gate, _) = unreachable_gate();
        assert_eq!(
            gate.cookie_domain_for(Some("app.example.com:4180")).as_deref(),
            Some("app.example.com")
        );
        assert_eq!(gate.cookie_domain_for(Some("127.0.0.1:4180")), None);
        assert_eq!(gate.cookie_domain_for(Some("[::1]:4180")), None);
        assert_eq!(gate.cookie_domain_for(None), None);

        let gate = gate.with_cookie_domain(Some(".example.com".into()));
        assert_eq!(
            gate.cookie_domain_for(Some("app.example.com")).as_deref(),
            Some(".example.com")
        );
        assert_eq!(
            gate.cookie_domain_for(Some("other.test")).as_deref(),
            Some("other.test"),
            "override applies only when the host ends with it"
        );
    }

    #[test]
    fn remote_addr_prefers_real_ip_header() {
        let mut request = get("/");
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 55000))));
        assert_eq!(remote_addr(&request), "10.0.0.7:55000");

        request
            .headers_mut()
            .insert("x-real-ip", "203.0.113.9".parse().unwrap());
        assert_eq!(remote_addr(&request), "203.0.113.9");
    }
}
