//! End-to-end tests of the sign-in routes, driven in-process with `oneshot`.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use k256::ecdsa::SigningKey;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use siwe_session::{
    crypto::{
        ethereum::{address_from_verifying_key, to_checksum_address, Address, EIP1271_MAGIC_VALUE},
        message::{canonical_hash, parse_message},
    },
    http::{ADDRESS_HEADER, CHAIN_ID_HEADER},
    siwe_router,
    verifier::ProviderError,
    AuthError, AuthService, ChainProvider, InMemorySessionStore, SameSitePolicy, SessionStore,
    SiweConfig,
};
use tower::ServiceExt;

struct TestWallet {
    key: SigningKey,
}

impl TestWallet {
    fn new(index: usize) -> Self {
        let secret = [
            "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
        ][index];
        let key = SigningKey::from_slice(&hex::decode(secret).unwrap()).unwrap();
        Self { key }
    }

    fn address(&self) -> String {
        to_checksum_address(&address_from_verifying_key(self.key.verifying_key()))
    }

    fn message(&self, nonce: &str) -> String {
        message_for(&self.address(), 1, nonce)
    }

    fn sign(&self, text: &str) -> String {
        let prehash = canonical_hash(&parse_message(text).unwrap()).unwrap();
        let (sig, recid) = self.key.sign_prehash_recoverable(&prehash).unwrap();
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recid.to_byte() + 27);
        format!("0x{}", hex::encode(bytes))
    }
}

fn message_for(address: &str, chain_id: u64, nonce: &str) -> String {
    format!(
        "localhost:3001 wants you to sign in with your Ethereum account:
{address}

Sign in with Ethereum to the app.

URI: http://localhost:3001
Version: 1
Chain ID: {chain_id}
Nonce: {nonce}
Issued At: 2024-05-01T10:00:00.000Z"
    )
}

struct TestApp {
    router: Router,
    store: Arc<InMemorySessionStore>,
}

impl TestApp {
    fn new() -> Self {
        Self::with(SiweConfig::default(), None)
    }

    fn with(config: SiweConfig, provider: Option<Arc<dyn ChainProvider>>) -> Self {
        let store = Arc::new(InMemorySessionStore::new());
        let auth = AuthService::new(store.clone(), provider, config);
        let router = siwe_router(Arc::new(auth)).unwrap();
        Self { router, store }
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn init(&self) -> String {
        let response = self
            .send(
                Request::post("/siwe/init")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        body["nonce"].as_str().unwrap().to_string()
    }

    async fn sign_in(&self, message: &str, signature: &str) -> Response<Body> {
        self.send(
            Request::post("/siwe/signin")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "message": message, "signature": signature }).to_string(),
                ))
                .unwrap(),
        )
        .await
    }

    async fn me(&self, cookie: Option<&str>) -> Response<Body> {
        let mut request = Request::get("/siwe/me");
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }

    async fn sign_out(&self, cookie: &str) -> Response<Body> {
        self.send(
            Request::get("/siwe/signout")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Full flow; returns the `name=value` cookie pair
    async fn authenticate(&self, wallet: &TestWallet) -> (String, String) {
        let nonce = self.init().await;
        let message = wallet.message(&nonce);
        let response = self.sign_in(&message, &wallet.sign(&message)).await;
        assert_eq!(response.status(), StatusCode::OK);
        (set_cookie_pair(&response).unwrap(), nonce)
    }
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

fn set_cookie_header(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().to_string())
}

fn set_cookie_pair(response: &Response<Body>) -> Option<String> {
    set_cookie_header(response).map(|v| v.split(';').next().unwrap().trim().to_string())
}

fn is_removal(set_cookie: &str) -> bool {
    set_cookie.contains("Max-Age=0")
}

/// Cookie header carrying a token for `message` signed with `signature`
fn cookie_for(message: &str, signature: &str) -> String {
    let token = siwe_session::AuthToken::new(signature, message);
    format!("__Host_auth_token={}", token.encode().unwrap())
}

#[tokio::test]
async fn test_initializes_session() {
    let app = TestApp::new();
    let nonce = app.init().await;

    assert_eq!(nonce.len(), 17);
    assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));

    let session = app.store.get(&nonce).await.unwrap().unwrap();
    assert_eq!(session.nonce, nonce);
    assert!(session.message().is_none());
}

#[tokio::test]
async fn test_authenticates_correctly() {
    let app = TestApp::new();
    let wallet = TestWallet::new(0);
    let nonce = app.init().await;
    let message = wallet.message(&nonce);

    let response = app.sign_in(&message, &wallet.sign(&message)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = set_cookie_header(&response).unwrap();
    assert!(set_cookie.starts_with("__Host_auth_token="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("Secure"));
    assert!(set_cookie.contains("SameSite=Strict"));
    assert!(set_cookie.contains("Path=/"));
    assert!(set_cookie.contains("Max-Age=86400"));

    let session = app.store.get(&nonce).await.unwrap().unwrap();
    assert_eq!(session.message().unwrap().nonce, nonce);

    let cookie = set_cookie_pair(&response).unwrap();
    let response = app.me(Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["loggedIn"], true);
    assert_eq!(body["message"]["nonce"], nonce.as_str());
    assert_eq!(body["message"]["address"], wallet.address().as_str());
    assert_eq!(body["message"]["chainId"], 1);
}

#[tokio::test]
async fn test_fails_when_not_signed_in() {
    let app = TestApp::new();
    let wallet = TestWallet::new(0);
    let nonce = app.init().await;
    let message = wallet.message(&nonce);

    let response = app.me(Some(&cookie_for(&message, &wallet.sign(&message)))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(is_removal(&set_cookie_header(&response).unwrap()));
    assert_eq!(body_text(response).await, "Invalid SIWE nonce");
}

#[tokio::test]
async fn test_fails_on_reused_nonce() {
    let app = TestApp::new();
    let first = TestWallet::new(0);
    let second = TestWallet::new(1);
    let (_, nonce) = app.authenticate(&first).await;

    let message = second.message(&nonce);
    let response = app.sign_in(&message, &second.sign(&message)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response).await, "Session already exists");

    let session = app.store.get(&nonce).await.unwrap().unwrap();
    assert_eq!(
        to_checksum_address(&session.message().unwrap().address),
        first.address()
    );
}

#[tokio::test]
async fn test_fails_on_uninitialized_session() {
    let app = TestApp::new();
    let wallet = TestWallet::new(0);
    let message = wallet.message(&"0".repeat(17));

    let response = app.sign_in(&message, &wallet.sign(&message)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response).await, "Session not initialized");
}

#[tokio::test]
async fn test_fails_on_truncated_nonce() {
    let app = TestApp::new();
    let wallet = TestWallet::new(0);
    let nonce = app.init().await;
    let message = wallet.message(&nonce[..nonce.len() - 1]);

    let response = app.sign_in(&message, &wallet.sign(&message)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response).await, "Session not initialized");
}

#[tokio::test]
async fn test_fails_on_invalid_signature() {
    let app = TestApp::new();
    let wallet = TestWallet::new(0);
    let nonce = app.init().await;
    let message = wallet.message(&nonce);

    let response = app.sign_in(&message, "invalid").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response).await, "Invalid SIWE token");

    let session = app.store.get(&nonce).await.unwrap().unwrap();
    assert!(!session.is_bound());
}

#[tokio::test]
async fn test_fails_on_invalid_message() {
    let app = TestApp::new();
    let wallet = TestWallet::new(0);
    let nonce = app.init().await;
    let signature = wallet.sign(&wallet.message(&nonce));

    let forged = message_for("0x0000000000000000000000000000000000000000", 1, &nonce);
    let response = app.sign_in(&forged, &signature).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response).await, "Invalid SIWE token");
}

#[tokio::test]
async fn test_fails_on_malformed_body() {
    let app = TestApp::new();

    let response = app
        .send(
            Request::post("/siwe/signin")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"signature":"0x"}"#))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app.sign_in("not a siwe message", "0x").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_fails_on_tampered_nonce() {
    let app = TestApp::new();
    let wallet = TestWallet::new(0);
    let nonce = app.init().await;
    let message = wallet.message(&nonce);
    let signature = wallet.sign(&message);
    app.sign_in(&message, &signature).await;

    let tampered = wallet.message(&"0".repeat(17));
    let response = app.me(Some(&cookie_for(&tampered, &signature))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(is_removal(&set_cookie_header(&response).unwrap()));
    assert_eq!(body_text(response).await, "Invalid SIWE token");
}

#[tokio::test]
async fn test_fails_on_expired_message() {
    let app = TestApp::new();
    let wallet = TestWallet::new(0);
    let nonce = app.init().await;
    let expired = format!(
        "{}\nExpiration Time: 2024-05-01T11:00:00.000Z",
        wallet.message(&nonce)
    );
    let signature = wallet.sign(&expired);

    let response = app.sign_in(&expired, &signature).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response).await, "Invalid SIWE token");
    assert!(!app.store.get(&nonce).await.unwrap().unwrap().is_bound());

    let response = app.me(Some(&cookie_for(&expired, &signature))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(is_removal(&set_cookie_header(&response).unwrap()));
    assert_eq!(body_text(response).await, "Invalid SIWE token");
}

#[tokio::test]
async fn test_signs_in_with_message_fields() {
    let app = TestApp::new();
    let wallet = TestWallet::new(0);
    let nonce = app.init().await;
    let signature = wallet.sign(&wallet.message(&nonce));

    let body = json!({
        "signature": signature,
        "message": {
            "domain": "localhost:3001",
            "address": wallet.address(),
            "statement": "Sign in with Ethereum to the app.",
            "uri": "http://localhost:3001",
            "version": "1",
            "chainId": 1,
            "nonce": nonce,
            "issuedAt": "2024-05-01T10:00:00.000Z"
        }
    });
    let response = app
        .send(
            Request::post("/siwe/signin")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = set_cookie_pair(&response).unwrap();
    let response = app.me(Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"]["nonce"], nonce.as_str());
}

#[tokio::test]
async fn test_fails_on_missing_token() {
    let app = TestApp::new();
    let response = app.me(None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie_header(&response).is_none());
}

#[tokio::test]
async fn test_fails_on_garbage_cookie() {
    let app = TestApp::new();
    let response = app.me(Some("__Host_auth_token=garbage")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(is_removal(&set_cookie_header(&response).unwrap()));
}

#[tokio::test]
async fn test_fails_when_not_session_owner() {
    let app = TestApp::new();
    let owner = TestWallet::new(0);
    let intruder = TestWallet::new(1);
    let (_, nonce) = app.authenticate(&owner).await;

    let forged = intruder.message(&nonce);
    let response = app
        .me(Some(&cookie_for(&forged, &intruder.sign(&forged))))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response).await, "Invalid SIWE nonce");
}

#[tokio::test]
async fn test_fails_when_session_does_not_exist() {
    let app = TestApp::new();
    let wallet = TestWallet::new(0);
    let message = wallet.message(&"0".repeat(17));

    let response = app.me(Some(&cookie_for(&message, &wallet.sign(&message)))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(response).await, "Invalid SIWE nonce");
}

#[tokio::test]
async fn test_signs_out_correctly() {
    let app = TestApp::new();
    let wallet = TestWallet::new(0);
    let (cookie, nonce) = app.authenticate(&wallet).await;
    assert!(app.store.get(&nonce).await.unwrap().is_some());

    let response = app.sign_out(&cookie).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(is_removal(&set_cookie_header(&response).unwrap()));
    assert_eq!(body_json(response).await["loggedIn"], false);
    assert!(app.store.get(&nonce).await.unwrap().is_none());

    let response = app.me(Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(is_removal(&set_cookie_header(&response).unwrap()));
}

#[tokio::test]
async fn test_sign_out_without_session() {
    let app = TestApp::new();
    let response = app
        .send(
            Request::post("/siwe/signout")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_refuses_cookie_setup_browsers_reject() {
    let mut config = SiweConfig::default();
    config.cookie.secure = false;
    config.cookie.same_site = SameSitePolicy::None;

    let auth = AuthService::new(Arc::new(InMemorySessionStore::new()), None, config);
    assert!(matches!(
        siwe_router(Arc::new(auth)),
        Err(AuthError::Config(_))
    ));
}

////////////////////////////////////////////////////////////////////////////////
// Contract wallets
////////////////////////////////////////////////////////////////////////////////

const CONTRACT_WALLET: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

struct MockWalletContract {
    accept: bool,
}

#[async_trait::async_trait]
impl ChainProvider for MockWalletContract {
    async fn call(
        &self,
        _chain_id: u64,
        contract: Address,
        _selector: [u8; 4],
        _args: &[u8],
    ) -> Result<Vec<u8>, ProviderError> {
        assert_eq!(to_checksum_address(&contract), CONTRACT_WALLET);
        if !self.accept {
            return Err(ProviderError::Transport("connection refused".to_string()));
        }
        let mut word = vec![0u8; 32];
        word[..4].copy_from_slice(&EIP1271_MAGIC_VALUE);
        Ok(word)
    }
}

#[tokio::test]
async fn test_contract_wallet_sign_in() {
    let app = TestApp::with(
        SiweConfig::default(),
        Some(Arc::new(MockWalletContract { accept: true })),
    );
    let nonce = app.init().await;
    let message = message_for(CONTRACT_WALLET, 1, &nonce);

    let response = app.sign_in(&message, "0x").await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = set_cookie_pair(&response).unwrap();

    let response = app.me(Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"]["address"], CONTRACT_WALLET);
}

#[tokio::test]
async fn test_contract_wallet_fails_closed() {
    let app = TestApp::with(
        SiweConfig::default(),
        Some(Arc::new(MockWalletContract { accept: false })),
    );
    let nonce = app.init().await;
    let message = message_for(CONTRACT_WALLET, 1, &nonce);

    let response = app.sign_in(&message, "0x").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!app.store.get(&nonce).await.unwrap().unwrap().is_bound());

    let response = app.me(Some(&cookie_for(&message, "0x"))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(is_removal(&set_cookie_header(&response).unwrap()));
}

////////////////////////////////////////////////////////////////////////////////
// Multiple identities per browser
////////////////////////////////////////////////////////////////////////////////

fn multi_identity_app() -> TestApp {
    let mut config = SiweConfig::default();
    config.session.multi_identity = true;
    TestApp::with(config, None)
}

async fn me_as(app: &TestApp, cookies: &str, wallet: &TestWallet) -> Response<Body> {
    app.send(
        Request::get("/siwe/me")
            .header(header::COOKIE, cookies)
            .header(CHAIN_ID_HEADER, "1")
            .header(ADDRESS_HEADER, wallet.address())
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn test_multiple_identities_coexist() {
    let app = multi_identity_app();
    let first = TestWallet::new(0);
    let second = TestWallet::new(1);

    let (first_cookie, _) = app.authenticate(&first).await;
    let (second_cookie, second_nonce) = app.authenticate(&second).await;
    assert!(first_cookie.starts_with(&format!("__Host_authToken{}1=", first.address())));
    assert!(second_cookie.starts_with(&format!("__Host_authToken{}1=", second.address())));

    let cookies = format!("{first_cookie}; {second_cookie}");

    let response = me_as(&app, &cookies, &first).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"]["address"], first.address().as_str());

    let response = me_as(&app, &cookies, &second).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"]["address"], second.address().as_str());

    // Signing out one identity leaves the other intact.
    let response = app
        .send(
            Request::post(format!("/siwe/signout?chainId=1&address={}", second.address()))
                .header(header::COOKIE, &cookies)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cleared = set_cookie_header(&response).unwrap();
    assert!(cleared.starts_with(&format!("__Host_authToken{}1=", second.address())));
    assert!(app.store.get(&second_nonce).await.unwrap().is_none());

    let response = me_as(&app, &cookies, &first).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_multiple_identities_require_selector() {
    let app = multi_identity_app();
    let wallet = TestWallet::new(0);
    let (cookie, _) = app.authenticate(&wallet).await;

    let response = app.me(Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
