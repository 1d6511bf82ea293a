// demos/basic_workflow.rs
//
// Minimal sign-in server. Configure with SIWE_* env vars, e.g.
//   SIWE_ENV=development SIWE_CHAIN_RPC_URL=http://localhost:8545 cargo run --example basic_workflow

use std::sync::Arc;

use axum::{
    http::{header, HeaderName, Method},
    routing::get,
    Router,
};
use siwe_session::{
    http::{ADDRESS_HEADER, CHAIN_ID_HEADER},
    siwe_router, AuthService, ChainProvider, InMemorySessionStore, JsonRpcChainProvider,
    SiweConfig, SiweSession, SiweState,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn whoami(session: SiweSession) -> String {
    format!(
        "Hello {} on chain {}",
        session.identity.checksum_address(),
        session.identity.chain_id
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,siwe_session=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SiweConfig::from_env()?;
    info!(
        secure = config.cookie.secure,
        same_site = ?config.cookie.same_site,
        multi_identity = config.session.multi_identity,
        "Configuration loaded"
    );

    let provider: Option<Arc<dyn ChainProvider>> =
        if config.chain.default_url.is_some() || !config.chain.urls.is_empty() {
            Some(Arc::new(JsonRpcChainProvider::new(config.chain.clone())?))
        } else {
            info!("No chain RPC configured, contract wallet sign-in disabled");
            None
        };

    let auth = Arc::new(AuthService::new(
        Arc::new(InMemorySessionStore::new()),
        provider,
        config,
    ));
    let _sweeper = auth.spawn_sweeper();

    let app = Router::new()
        .route("/whoami", get(whoami))
        .with_state(SiweState { auth: auth.clone() })
        .merge(siwe_router(auth)?)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_credentials(true)
                .allow_origin(AllowOrigin::mirror_request())
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([
                    header::CONTENT_TYPE,
                    HeaderName::from_static(CHAIN_ID_HEADER),
                    HeaderName::from_static(ADDRESS_HEADER),
                ]),
        );

    let port = std::env::var("PORT").unwrap_or_else(|_| "3001".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, app).await?;
    Ok(())
}
