// src/services/api_server.rs
//! HTTP surface of the proxy.
//!
//! Exposes enrollment and transaction endpoints behind bearer-token
//! authentication:
//! - `POST /api/v1/account/enroll` provisions (or reuses) the caller's
//!   network identity and returns it base64 encoded
//! - `POST /api/v1/:channel/:chaincode/submit-transaction` submits as the caller
//! - `POST /api/v1/:channel/:chaincode/evaluate-transaction` evaluates as the caller
//! - `GET /healthz` reports liveness without authentication
//!
//! Every request carries an `x-request-id`, is logged on completion and
//! passes through a permissive CORS layer.

use crate::error::{AuthError, ProxyError};
use crate::models::registration::RegistrationInfo;
use crate::models::subject::AuthenticatedSubject;
use crate::services::authenticator::Authenticator;
use crate::services::identity_bridge::IdentityBridge;
use crate::services::transaction_submitter::TransactionSubmitter;
use crate::utils::claims;
use crate::utils::serialization::{encode_pem, is_json};
use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Json, Path, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderName, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request payload for submitting or evaluating a transaction
#[derive(Serialize, Deserialize)]
struct TransactionBody {
    name: String,
    #[serde(default)]
    args: Vec<String>,
}

/// Response for a successful enrollment
#[derive(Serialize, Deserialize)]
struct EnrollResponse {
    /// Base64 of the PEM certificate
    cert: String,
    /// Base64 of the PEM private key
    key: String,
}

/// API server state shared by every handler
pub struct ApiServer {
    /// Turns bearer tokens into subjects
    authenticator: Arc<dyn Authenticator>,

    /// Provision-if-absent credential lifecycle
    identity_bridge: Arc<IdentityBridge>,

    /// Submits and evaluates as the caller
    submitter: Arc<TransactionSubmitter>,

    /// Claim path holding the registration request
    claim_key: String,
}

impl ApiServer {
    /// Creates a new instance of the API server
    ///
    /// # Arguments
    /// * `authenticator` - Session validation strategy
    /// * `identity_bridge` - Credential provisioning
    /// * `submitter` - Transaction submission
    /// * `claim_key` - Claim path of the registration request (e.g. `fabric`)
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        identity_bridge: Arc<IdentityBridge>,
        submitter: Arc<TransactionSubmitter>,
        claim_key: impl Into<String>,
    ) -> Self {
        ApiServer {
            authenticator,
            identity_bridge,
            submitter,
            claim_key: claim_key.into(),
        }
    }

    /// Builds the router with all routes and middleware attached.
    pub fn router(&self) -> Router {
        let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

        Router::new()
            .route("/healthz", get(Self::health_handler))
            .route("/api/v1/account/enroll", post(Self::enroll_handler))
            .route(
                "/api/v1/:channel/:chaincode/submit-transaction",
                post(Self::submit_transaction_handler),
            )
            .route(
                "/api/v1/:channel/:chaincode/evaluate-transaction",
                post(Self::evaluate_transaction_handler),
            )
            .fallback(Self::fallback_handler)
            .with_state(Arc::new(self.clone()))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                    .layer(middleware::from_fn(log_requests))
                    .layer(PropagateRequestIdLayer::new(request_id))
                    .layer(CorsLayer::permissive()),
            )
    }

    /// Starts the API server and serves until SIGINT or SIGTERM.
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to
    /// * `shutdown_grace` - Time in-flight requests get once shutdown begins
    ///
    /// # Errors
    /// Bind and accept-loop failures.
    pub async fn run(&self, addr: SocketAddr, shutdown_grace: Duration) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("Listening on {}", listener.local_addr()?);
        self.serve(listener, shutdown_grace, shutdown_signal()).await
    }

    /// Serves on `listener` until `shutdown` resolves, then drains in-flight
    /// requests for at most `shutdown_grace` before aborting them.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown_grace: Duration, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let app = self.router();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        tokio::select! {
            result = &mut server => return join_result(result),
            _ = shutdown => {}
        }

        log::info!("Shutting down, draining in-flight requests for {:?}", shutdown_grace);
        let _ = stop_tx.send(());

        match tokio::time::timeout(shutdown_grace, &mut server).await {
            Ok(result) => join_result(result),
            Err(_) => {
                log::warn!("Grace period elapsed, aborting remaining requests");
                server.abort();
                Ok(())
            }
        }
    }

    // =====================
    // Health
    // =====================

    /// Liveness probe
    ///
    /// # Endpoint
    /// GET /healthz
    async fn health_handler() -> impl IntoResponse {
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        }))
    }

    // =====================
    // Enrollment
    // =====================

    /// Provisions the caller's network identity on first use
    ///
    /// # Endpoint
    /// POST /api/v1/account/enroll
    ///
    /// # Responses
    /// - 200 OK: `{cert, key}`, both base64 encoded PEM
    /// - 400 Bad Request: registration claim has the wrong shape, or the
    ///   subject cannot name a directory
    /// - 401 Unauthorized: no valid session
    /// - 500 Internal Server Error: claim extraction or provisioning failed
    async fn enroll_handler(
        State(state): State<Arc<ApiServer>>,
        Session(subject): Session,
    ) -> Result<Json<EnrollResponse>, ProxyError> {
        let claim = claims::extract(&subject.claims, &state.claim_key)?;
        let registration = RegistrationInfo::from_claim(claim, &subject.subject)?;

        let credential = state
            .identity_bridge
            .ensure_credential(&subject.subject, &registration)
            .await?;

        Ok(Json(EnrollResponse {
            cert: encode_pem(&credential.certificate_pem),
            key: encode_pem(&credential.private_key_pem),
        }))
    }

    // =====================
    // Transactions
    // =====================

    /// Submits a transaction as the caller and waits for commit
    ///
    /// # Endpoint
    /// POST /api/v1/:channel/:chaincode/submit-transaction
    ///
    /// # Request Body
    /// `{"name": function, "args": [..]}`
    ///
    /// # Responses
    /// - 200 OK: raw transaction result
    /// - 400 Bad Request: blank channel or chaincode, malformed body
    /// - 401 Unauthorized: no valid session
    /// - 500 Internal Server Error: not enrolled, or the ledger refused
    async fn submit_transaction_handler(
        State(state): State<Arc<ApiServer>>,
        Session(subject): Session,
        Path((channel, chaincode)): Path<(String, String)>,
        payload: Result<Json<TransactionBody>, JsonRejection>,
    ) -> Result<Response, ProxyError> {
        let Json(body) = payload.map_err(|rejection| ProxyError::BadRequest(rejection.body_text()))?;
        let result = state
            .submitter
            .submit(&subject, &channel, &chaincode, &body.name, body.args)
            .await?;
        Ok(passthrough(result))
    }

    /// Evaluates a transaction as the caller; same contract as submit
    ///
    /// # Endpoint
    /// POST /api/v1/:channel/:chaincode/evaluate-transaction
    async fn evaluate_transaction_handler(
        State(state): State<Arc<ApiServer>>,
        Session(subject): Session,
        Path((channel, chaincode)): Path<(String, String)>,
        payload: Result<Json<TransactionBody>, JsonRejection>,
    ) -> Result<Response, ProxyError> {
        let Json(body) = payload.map_err(|rejection| ProxyError::BadRequest(rejection.body_text()))?;
        let result = state
            .submitter
            .evaluate(&subject, &channel, &chaincode, &body.name, body.args)
            .await?;
        Ok(passthrough(result))
    }

    /// Unmatched paths. Transaction routes with an empty channel or
    /// chaincode segment never reach the routes above and land here.
    async fn fallback_handler(
        State(state): State<Arc<ApiServer>>,
        headers: HeaderMap,
        uri: Uri,
    ) -> Response {
        if !is_incomplete_transaction_route(uri.path()) {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "not found", "code": "NOT_FOUND" })),
            )
                .into_response();
        }

        match authenticate(&state, &headers).await {
            Ok(_) => ProxyError::BadRequest("channel and chaincode are required".into()).into_response(),
            Err(err) => err.into_response(),
        }
    }
}

// Implement Clone for ApiServer to use with Axum's State
impl Clone for ApiServer {
    fn clone(&self) -> Self {
        ApiServer {
            authenticator: Arc::clone(&self.authenticator),
            identity_bridge: Arc::clone(&self.identity_bridge),
            submitter: Arc::clone(&self.submitter),
            claim_key: self.claim_key.clone(),
        }
    }
}

// =====================
// Session
// =====================

/// Authenticated caller, extracted from `Authorization: Bearer <token>`.
///
/// Rejects with 401 before the handler body runs, so unauthenticated
/// requests never touch the store, the CA or the gateway.
pub struct Session(pub AuthenticatedSubject);

#[axum::async_trait]
impl FromRequestParts<Arc<ApiServer>> for Session {
    type Rejection = ProxyError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<ApiServer>) -> Result<Self, Self::Rejection> {
        authenticate(state, &parts.headers).await.map(Session)
    }
}

async fn authenticate(state: &ApiServer, headers: &HeaderMap) -> Result<AuthenticatedSubject, ProxyError> {
    let token = bearer_token(headers).ok_or(AuthError::MissingToken)?;
    let subject = state.authenticator.authenticate(token).await?;
    if !subject.active {
        return Err(AuthError::Inactive.into());
    }
    Ok(subject)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

// =====================
// Responses
// =====================

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ProxyError::BadRequest(_) | ProxyError::InvalidRegistration(_) | ProxyError::InvalidSubject(_) => {
                StatusCode::BAD_REQUEST
            }
            ProxyError::ClaimExtraction(_)
            | ProxyError::ProvisioningFailed(_)
            | ProxyError::CredentialNotProvisioned(_)
            | ProxyError::Network(_)
            | ProxyError::SubmissionFailed(_)
            | ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            log::error!("{} {}", status.as_u16(), self);
        } else {
            log::warn!("{} {}", status.as_u16(), self);
        }

        let body = json!({ "error": self.to_string(), "code": self.code() });
        (status, Json(body)).into_response()
    }
}

/// Returns the ledger's bytes untouched, labelled JSON when they parse as JSON.
fn passthrough(result: Bytes) -> Response {
    let content_type = if is_json(&result) {
        "application/json"
    } else {
        "text/plain; charset=utf-8"
    };
    ([(header::CONTENT_TYPE, content_type)], result).into_response()
}

fn is_incomplete_transaction_route(path: &str) -> bool {
    let rest = match path.strip_prefix("/api/v1/") {
        Some(rest) => rest,
        None => return false,
    };
    let segments: Vec<&str> = rest.split('/').collect();
    match segments.as_slice() {
        [channel, chaincode, action] => {
            matches!(*action, "submit-transaction" | "evaluate-transaction")
                && (channel.is_empty() || chaincode.is_empty())
        }
        _ => false,
    }
}

// =====================
// Middleware & lifecycle
// =====================

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    log::info!(
        "{} {} {} {}ms request_id={}",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis(),
        request_id
    );
    response
}

fn join_result(result: Result<io::Result<()>, tokio::task::JoinError>) -> io::Result<()> {
    result.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                log::error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Received Ctrl+C signal"),
        _ = terminate => log::info!("Received SIGTERM signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::gateway_client::NetworkClientFactory;
    use crate::test_support::{ca_settings, gateway_settings, write_anchor, FakeAuthenticator, FakeCa, FakeGateway};
    use crate::wallet::credential_storage::FileCredentialStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use serde_json::{Map, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Fixture {
        dir: TempDir,
        ca: Arc<FakeCa>,
        gateway: Arc<FakeGateway>,
        auth: Arc<FakeAuthenticator>,
        server: ApiServer,
    }

    fn claims(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("claims must be an object"),
        }
    }

    fn fixture_with(gateway: FakeGateway, claim_key: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let anchor = write_anchor(&dir);
        let client_home = dir.path().join("fabric");

        let mut settings = ca_settings("http://ca.invalid:7054");
        settings.client_home = client_home.clone();

        let store = Arc::new(FileCredentialStore::new(client_home, "msp", "Org1MSP"));
        let ca = Arc::new(FakeCa::default());
        let bridge = Arc::new(IdentityBridge::new(store.clone(), ca.clone(), settings));
        let factory = Arc::new(NetworkClientFactory::new(gateway_settings(&anchor, "127.0.0.1:7051")));
        let gateway = Arc::new(gateway);
        let submitter = Arc::new(TransactionSubmitter::new(store, factory, gateway.clone()));

        let alice = AuthenticatedSubject::new(
            "alice",
            claims(json!({
                "sub": "alice",
                "fabric": { "affiliation": "org1.department1", "attrs": [{ "name": "role", "value": "buyer" }] },
                "org": "acme"
            })),
        );
        let mallory = AuthenticatedSubject::new("mallory", claims(json!({ "sub": "mallory", "fabric": "org1" })));
        let nina = AuthenticatedSubject::new("nina", claims(json!({ "sub": "nina" })));
        let mut idle = alice.clone();
        idle.subject = "idle".into();
        idle.active = false;

        let auth = Arc::new(
            FakeAuthenticator::default()
                .with_session("alice-token", alice)
                .with_session("mallory-token", mallory)
                .with_session("nina-token", nina)
                .with_session("idle-token", idle),
        );

        let server = ApiServer::new(auth.clone(), bridge, submitter, claim_key);
        Fixture {
            dir,
            ca,
            gateway,
            auth,
            server,
        }
    }

    fn fixture(gateway: FakeGateway) -> Fixture {
        fixture_with(gateway, "fabric")
    }

    fn post(uri: &str, token: Option<&str>, body: Value) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(server: &ApiServer, request: HttpRequest<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = server.router().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body)
    }

    fn json_body(body: &Bytes) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    fn tx_body() -> Value {
        json!({ "name": "CreateAsset", "args": ["asset1", "blue", "5", "tom", "300"] })
    }

    #[tokio::test]
    async fn test_unauthenticated_requests_have_no_side_effects() {
        let fx = fixture(FakeGateway::returning(b"{}"));

        let (status, _, body) = send(&fx.server, post("/api/v1/account/enroll", None, json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(&body)["code"], "UNAUTHENTICATED");

        let (status, _, _) = send(&fx.server, post("/api/v1/account/enroll", Some("forged"), json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, _) = send(&fx.server, post("/api/v1/account/enroll", Some("idle-token"), json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let uri = "/api/v1/mychannel/assetcc/submit-transaction";
        let (status, _, _) = send(&fx.server, post(uri, None, tx_body())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        assert!(!fx.dir.path().join("fabric").exists());
        assert!(fx.ca.enrolled().is_empty());
        assert_eq!(fx.ca.registration_count(), 0);
        assert_eq!(fx.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_enroll_twice_returns_same_credential() {
        let fx = fixture(FakeGateway::returning(b"{}"));

        let (status, _, first) = send(&fx.server, post("/api/v1/account/enroll", Some("alice-token"), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, second) = send(&fx.server, post("/api/v1/account/enroll", Some("alice-token"), json!({}))).await;
        assert_eq!(status, StatusCode::OK);

        let first = json_body(&first);
        assert_eq!(first, json_body(&second));
        assert_eq!(fx.ca.registration_count(), 1);

        let cert = base64::decode(first["cert"].as_str().unwrap()).unwrap();
        let key = base64::decode(first["key"].as_str().unwrap()).unwrap();
        assert!(String::from_utf8(cert).unwrap().starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(String::from_utf8(key).unwrap().contains("PRIVATE KEY-----"));

        let registered = fx.ca.registered.lock().unwrap()[0].clone();
        assert_eq!(registered.name, "alice");
        assert_eq!(registered.affiliation, "org1.department1");
        assert_eq!(registered.attrs[0].name, "role");
    }

    #[tokio::test]
    async fn test_enroll_rejects_malformed_claim() {
        let fx = fixture(FakeGateway::returning(b"{}"));

        let (status, _, body) = send(&fx.server, post("/api/v1/account/enroll", Some("mallory-token"), json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&body)["code"], "INVALID_REGISTRATION");
        assert_eq!(fx.ca.registration_count(), 0);
    }

    #[tokio::test]
    async fn test_enroll_without_claim_uses_defaults() {
        let fx = fixture(FakeGateway::returning(b"{}"));

        let (status, _, body) = send(&fx.server, post("/api/v1/account/enroll", Some("nina-token"), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json_body(&body)["cert"].is_string());

        let registered = fx.ca.registered.lock().unwrap()[0].clone();
        assert_eq!(registered.name, "nina");
        assert_eq!(registered.identity_type, "client");
        assert!(registered.attrs.is_empty());
    }

    #[tokio::test]
    async fn test_provider_outage_is_500() {
        let fx = fixture(FakeGateway::returning(b"{}"));
        fx.auth.unavailable.store(true, std::sync::atomic::Ordering::SeqCst);

        let (status, _, body) = send(&fx.server, post("/api/v1/account/enroll", Some("alice-token"), json!({}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(&body)["code"], "INTERNAL");
        assert_eq!(fx.ca.registration_count(), 0);
    }

    #[tokio::test]
    async fn test_enroll_claim_extraction_failure_is_500() {
        let fx = fixture_with(FakeGateway::returning(b"{}"), "org.fabric");

        let (status, _, body) = send(&fx.server, post("/api/v1/account/enroll", Some("alice-token"), json!({}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(&body)["code"], "CLAIM_EXTRACTION_FAILED");
    }

    #[tokio::test]
    async fn test_submit_passes_json_through() {
        let fx = fixture(FakeGateway::returning(b"{\"ID\":\"asset1\",\"Color\":\"blue\"}"));
        send(&fx.server, post("/api/v1/account/enroll", Some("alice-token"), json!({}))).await;

        let uri = "/api/v1/mychannel/assetcc/submit-transaction";
        let (status, headers, body) = send(&fx.server, post(uri, Some("alice-token"), tx_body())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(&body[..], b"{\"ID\":\"asset1\",\"Color\":\"blue\"}");

        let sent = fx.gateway.submitted.lock().unwrap()[0].clone();
        assert_eq!(sent.channel, "mychannel");
        assert_eq!(sent.contract, "assetcc");
        assert_eq!(sent.function, "CreateAsset");
        assert_eq!(sent.args, vec!["asset1", "blue", "5", "tom", "300"]);
    }

    #[tokio::test]
    async fn test_evaluate_returns_text_result() {
        let fx = fixture(FakeGateway::returning(b"asset1 exists"));
        send(&fx.server, post("/api/v1/account/enroll", Some("alice-token"), json!({}))).await;

        let uri = "/api/v1/mychannel/assetcc/evaluate-transaction";
        let body = json!({ "name": "AssetExists", "args": ["asset1"] });
        let (status, headers, body) = send(&fx.server, post(uri, Some("alice-token"), body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(&body[..], b"asset1 exists");
        assert_eq!(fx.gateway.evaluated.lock().unwrap().len(), 1);
        assert!(fx.gateway.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_or_empty_route_segments() {
        let fx = fixture(FakeGateway::returning(b"{}"));
        send(&fx.server, post("/api/v1/account/enroll", Some("alice-token"), json!({}))).await;

        let (status, _, _) = send(
            &fx.server,
            post("/api/v1/%20/assetcc/submit-transaction", Some("alice-token"), tx_body()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, body) = send(
            &fx.server,
            post("/api/v1//assetcc/submit-transaction", Some("alice-token"), tx_body()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&body)["code"], "BAD_REQUEST");

        let (status, _, _) = send(&fx.server, post("/api/v1/mychannel//evaluate-transaction", None, tx_body())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        assert_eq!(fx.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_submit_before_enroll_is_500() {
        let fx = fixture(FakeGateway::returning(b"{}"));

        let uri = "/api/v1/mychannel/assetcc/submit-transaction";
        let (status, _, body) = send(&fx.server, post(uri, Some("alice-token"), tx_body())).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(&body)["code"], "CREDENTIAL_NOT_PROVISIONED");
        assert_eq!(fx.ca.registration_count(), 0);
        assert_eq!(fx.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_transaction_body_is_400() {
        let fx = fixture(FakeGateway::returning(b"{}"));

        let uri = "/api/v1/mychannel/assetcc/submit-transaction";
        let (status, _, _) = send(&fx.server, post(uri, Some("alice-token"), json!({ "args": [1, 2] }))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(fx.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_health_and_request_id() {
        let fx = fixture(FakeGateway::returning(b"{}"));

        let request = HttpRequest::builder().uri("/healthz").body(Body::empty()).unwrap();
        let (status, headers, body) = send(&fx.server, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["status"], "ok");
        assert!(headers.contains_key(REQUEST_ID_HEADER));
        assert_eq!(fx.auth.call_count(), 0);

        let request = HttpRequest::builder()
            .uri("/healthz")
            .header(REQUEST_ID_HEADER, "trace-42")
            .body(Body::empty())
            .unwrap();
        let (_, headers, _) = send(&fx.server, request).await;
        assert_eq!(headers[REQUEST_ID_HEADER], "trace-42");
    }

    #[tokio::test]
    async fn test_unknown_path_is_404_without_authentication() {
        let fx = fixture(FakeGateway::returning(b"{}"));

        let (status, _, _) = send(&fx.server, post("/api/v2/whatever", None, json!({}))).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(fx.auth.call_count(), 0);
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, "bearer  abc ".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, "Basic YWxpY2U6cHc=".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_incomplete_transaction_route() {
        assert!(is_incomplete_transaction_route("/api/v1//cc/submit-transaction"));
        assert!(is_incomplete_transaction_route("/api/v1/ch//evaluate-transaction"));
        assert!(!is_incomplete_transaction_route("/api/v1/ch/cc/submit-transaction"));
        assert!(!is_incomplete_transaction_route("/api/v1//cc/other"));
        assert!(!is_incomplete_transaction_route("/healthz"));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let fx = fixture(FakeGateway::returning(b"{}"));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let server = fx.server.clone();
        let handle = tokio::spawn(async move {
            server
                .serve(listener, Duration::from_millis(500), async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        let response = reqwest::get(format!("http://{}/healthz", addr)).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        drop(response);

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
