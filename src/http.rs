//! axum routes for the sign-in flow and the per-request session guard.
//!
//! | Route | Method | Result |
//! |---|---|---|
//! | `/siwe/init` | POST | `{ nonce }` |
//! | `/siwe/signin` | POST | sets the auth cookie |
//! | `/siwe/me` | GET | `{ loggedIn, message }` |
//! | `/siwe/signout` | GET, POST | clears the auth cookie |
//!
//! `init` and `signin` run without the guard since they work on sessions that
//! are not bound yet.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;

use crate::{
    auth::{AuthService, MeResponse, NonceResponse, SignInRequest, VerifiedIdentity},
    config::{CookieConfig, SameSitePolicy},
    crypto::{
        ethereum::{parse_address, Address},
        message::{Message, MessageView},
        token::{identity_cookie_name, AuthToken, TokenSet, AUTH_COOKIE_NAME},
    },
    error::{AuthError, Result},
};

pub const CHAIN_ID_HEADER: &str = "x-siwe-chain-id";
pub const ADDRESS_HEADER: &str = "x-siwe-address";

/// State shared by the sign-in routes
#[derive(Clone)]
pub struct SiweState {
    pub auth: Arc<AuthService>,
}

/// Where an error surfaced, which decides the status of `InvalidToken`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteKind {
    /// Presenting a proof at registration time
    SignIn,
    /// Checking a cookie on later requests
    Read,
}

/// HTTP status for an error on a given kind of route
pub fn status_for(error: &AuthError, route: RouteKind) -> StatusCode {
    match error {
        AuthError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AuthError::MissingToken => StatusCode::UNAUTHORIZED,
        AuthError::InvalidToken => match route {
            RouteKind::SignIn => StatusCode::FORBIDDEN,
            RouteKind::Read => StatusCode::UNAUTHORIZED,
        },
        AuthError::SessionNotFound
        | AuthError::SessionAlreadyExists
        | AuthError::InvalidNonce
        | AuthError::VerificationUnavailable(_) => StatusCode::FORBIDDEN,
        AuthError::Storage(_) | AuthError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Plain-text reason sent to clients; internal detail stays in the logs
fn public_reason(error: &AuthError) -> String {
    match error {
        AuthError::VerificationUnavailable(_) => "Verification unavailable".to_string(),
        AuthError::Storage(_) | AuthError::Config(_) => "Internal server error".to_string(),
        other => other.to_string(),
    }
}

fn error_response(
    error: &AuthError,
    route: RouteKind,
    config: &CookieConfig,
    clear_cookie: Option<String>,
) -> Response {
    let status = status_for(error, route);
    if status.is_server_error() {
        tracing::error!(error = %error, "Sign-in request failed");
    }
    let jar = match clear_cookie {
        Some(name) => CookieJar::new().add(removal_cookie(config, name)),
        None => CookieJar::new(),
    };
    (status, jar, public_reason(error)).into_response()
}

/// Build the sign-in router
///
/// Validates the cookie configuration first, so a setup that browsers would
/// silently reject fails at startup instead of on the first request.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use siwe_session::{siwe_router, AuthService, InMemorySessionStore, SiweConfig};
///
/// let auth = AuthService::new(Arc::new(InMemorySessionStore::new()), None, SiweConfig::default());
/// let router = siwe_router(Arc::new(auth)).unwrap();
/// ```
pub fn siwe_router(auth: Arc<AuthService>) -> Result<Router> {
    auth.config.validate()?;

    Ok(Router::new()
        .route("/siwe/init", post(init))
        .route("/siwe/signin", post(sign_in))
        .route("/siwe/me", get(me))
        .route("/siwe/signout", get(sign_out).post(sign_out))
        .with_state(SiweState { auth }))
}

fn same_site(policy: SameSitePolicy) -> SameSite {
    match policy {
        SameSitePolicy::Strict => SameSite::Strict,
        SameSitePolicy::Lax => SameSite::Lax,
        SameSitePolicy::None => SameSite::None,
    }
}

fn auth_cookie(config: &CookieConfig, name: String, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(config.secure)
        .same_site(same_site(config.same_site))
        .path(config.path.clone())
        .max_age(time::Duration::seconds(config.max_age_secs))
        .build()
}

fn removal_cookie(config: &CookieConfig, name: String) -> Cookie<'static> {
    let mut cookie = auth_cookie(config, name, String::new());
    cookie.make_removal();
    cookie
}

/// Chain and address a request wants to act as, in multi-identity mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentitySelector {
    pub chain_id: u64,
    pub address: Address,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectorQuery {
    chain_id: Option<u64>,
    address: Option<String>,
}

impl IdentitySelector {
    /// Read the selector from headers, falling back to query parameters
    pub fn from_parts(parts: &Parts) -> Option<Self> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let query = Query::<SelectorQuery>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();

        let chain_id = header(CHAIN_ID_HEADER)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .or(query.chain_id)?;
        let address = header(ADDRESS_HEADER)
            .or(query.address)
            .and_then(|v| parse_address(&v))?;

        Some(Self { chain_id, address })
    }

    pub fn cookie_name(&self) -> String {
        identity_cookie_name(self.chain_id, &self.address)
    }
}

/// Guarded request: the token in its cookie verified against the session store
pub struct SiweSession {
    pub identity: VerifiedIdentity,
    pub cookie_name: String,
}

/// Guard failure; clears the offending cookie when one was presented
pub struct GuardRejection {
    pub error: AuthError,
    cookie_name: Option<String>,
    cookie_config: CookieConfig,
}

impl IntoResponse for GuardRejection {
    fn into_response(self) -> Response {
        error_response(
            &self.error,
            RouteKind::Read,
            &self.cookie_config,
            self.cookie_name,
        )
    }
}

impl FromRequestParts<SiweState> for SiweSession {
    type Rejection = GuardRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SiweState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let config = &state.auth.config;
        let jar = CookieJar::from_headers(&parts.headers);

        let reject = |error: AuthError, cookie_name: Option<String>| GuardRejection {
            error,
            cookie_name,
            cookie_config: config.cookie.clone(),
        };

        let (cookie_name, token) = if config.session.multi_identity {
            let selector =
                IdentitySelector::from_parts(parts).ok_or_else(|| reject(AuthError::MissingToken, None))?;
            let cookie_name = selector.cookie_name();
            let tokens = TokenSet::from_cookies(jar.iter().map(|c| (c.name(), c.value())));
            match tokens.get(selector.chain_id, &selector.address) {
                Some(token) => (cookie_name, token.clone()),
                None => {
                    // Present but undecodable or mislabelled cookies still get cleared.
                    let presented = jar.get(&cookie_name).map(|_| cookie_name);
                    let error = if presented.is_some() {
                        AuthError::InvalidToken
                    } else {
                        AuthError::MissingToken
                    };
                    return Err(reject(error, presented));
                }
            }
        } else {
            let cookie = jar
                .get(AUTH_COOKIE_NAME)
                .ok_or_else(|| reject(AuthError::MissingToken, None))?;
            let token = AuthToken::decode(cookie.value())
                .map_err(|e| reject(e, Some(AUTH_COOKIE_NAME.to_string())))?;
            (AUTH_COOKIE_NAME.to_string(), token)
        };

        match state.auth.authenticate(&token).await {
            Ok(identity) => Ok(SiweSession {
                identity,
                cookie_name,
            }),
            Err(error) => {
                tracing::warn!(error = %error, "Rejected session token");
                Err(reject(error, Some(cookie_name)))
            }
        }
    }
}

async fn init(State(state): State<SiweState>) -> Response {
    match state.auth.generate_nonce().await {
        Ok(nonce) => Json(NonceResponse { nonce }).into_response(),
        Err(error) => error_response(&error, RouteKind::SignIn, &state.auth.config.cookie, None),
    }
}

/// Cookie a sign-in for this message would set
fn cookie_name_for(state: &SiweState, message: &Message) -> String {
    if state.auth.config.session.multi_identity {
        identity_cookie_name(message.chain_id, &message.address)
    } else {
        AUTH_COOKIE_NAME.to_string()
    }
}

async fn sign_in(
    State(state): State<SiweState>,
    jar: CookieJar,
    body: std::result::Result<Json<SignInRequest>, JsonRejection>,
) -> Response {
    let cookie_config = &state.auth.config.cookie;

    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            let error = AuthError::InvalidInput(rejection.body_text());
            return error_response(&error, RouteKind::SignIn, cookie_config, None);
        }
    };
    let message = match request.message.into_message() {
        Ok(message) => message,
        Err(error) => return error_response(&error, RouteKind::SignIn, cookie_config, None),
    };
    let name = cookie_name_for(&state, &message);

    match state.auth.sign_in_message(message, &request.signature).await {
        Ok(signed_in) => {
            let value = match signed_in.token.encode() {
                Ok(value) => value,
                Err(error) => {
                    return error_response(&error, RouteKind::SignIn, cookie_config, None)
                }
            };
            (
                StatusCode::OK,
                jar.add(auth_cookie(cookie_config, name, value)),
            )
                .into_response()
        }
        Err(error) => {
            let clear = jar.get(&name).map(|_| name);
            error_response(&error, RouteKind::SignIn, cookie_config, clear)
        }
    }
}

async fn me(session: SiweSession) -> Json<MeResponse> {
    Json(MeResponse {
        logged_in: true,
        message: Some(MessageView::from(&session.identity.message)),
    })
}

async fn sign_out(
    State(state): State<SiweState>,
    session: std::result::Result<SiweSession, GuardRejection>,
) -> Response {
    let cookie_config = &state.auth.config.cookie;

    let cookie_name = match session {
        Ok(session) => {
            let cookie_name = session.cookie_name;
            if let Err(error) = state.auth.sign_out(session.identity).await {
                return error_response(&error, RouteKind::Read, cookie_config, Some(cookie_name));
            }
            Some(cookie_name)
        }
        Err(rejection) => {
            tracing::debug!(error = %rejection.error, "Sign-out without a valid session");
            rejection.cookie_name
        }
    };

    let jar = match cookie_name {
        Some(name) => CookieJar::new().add(removal_cookie(cookie_config, name)),
        None => CookieJar::new(),
    };
    (
        StatusCode::OK,
        jar,
        Json(MeResponse {
            logged_in: false,
            message: None,
        }),
    )
        .into_response()
}
