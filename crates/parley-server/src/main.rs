use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::middleware::require_auth;
use parley_api::{AppState, AppStateInner, conversations, members, messages, reactions, search, views};
use parley_gateway::connection;
use parley_gateway::dispatcher::Dispatcher;
use parley_gateway::presence::PresenceDirectory;

#[derive(Clone)]
struct ServerState {
    presence: PresenceDirectory,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = parley_db::Database::open(&PathBuf::from(&db_path))?;

    // The presence directory is opened here and injected into the
    // dispatcher; it lives exactly as long as the process.
    let presence = PresenceDirectory::new();
    let dispatcher = Dispatcher::new(presence.clone());

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher,
        jwt_secret: jwt_secret.clone(),
        http: reqwest::Client::new(),
    });

    let server_state = ServerState {
        presence: presence.clone(),
        jwt_secret,
    };

    // REST surface; every route sits behind the JWT middleware.
    let api_routes = Router::new()
        .route("/chat/dm/{username}", get(conversations::find_direct_message))
        .route("/chats/{username}", get(conversations::list_conversations))
        .route(
            "/chat/messages/{target}",
            get(messages::list_messages).post(messages::create_message),
        )
        .route(
            "/chat/messages/{username}/{message_id}",
            delete(messages::delete_message),
        )
        .route("/chat/media/{username}", post(messages::create_media_message))
        .route("/chat/reaction/{username}", patch(reactions::react_to_message))
        .route("/chat/start/{username}", post(conversations::start_conversation))
        .route(
            "/chat/m/{username}/{conversation_id}/{member}",
            post(members::add_member).delete(members::remove_member),
        )
        .route(
            "/chat/a/{username}/{conversation_id}/{member}",
            post(members::promote_collaborator).delete(members::demote_collaborator),
        )
        .route(
            "/chat/view/{username}/{conversation_id}/{message_id}",
            post(views::read_conversation),
        )
        .route(
            "/chat/view/{username}/{conversation_id}",
            patch(views::mark_chat_status),
        )
        .route(
            "/chat/review/{username}/{notifier}",
            post(members::approve_membership).delete(members::deny_membership),
        )
        .route(
            "/chat/search/{username}/{conversation_id}",
            get(search::search_conversation),
        )
        .route("/chat/search/{username}", get(search::search_all_conversations))
        .route(
            "/chat/{username}/{conversation_id}",
            patch(conversations::edit_conversation).delete(members::leave_conversation),
        )
        .route("/chat/{conversation}", get(conversations::get_conversation))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(server_state);

    let app = Router::new()
        .nest("/api/v1", api_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain live presence entries before the process exits.
    presence.drain().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining");
}

#[derive(Deserialize)]
struct GatewayQuery {
    token: String,
}

/// WebSocket upgrade. The connection authenticates exactly once, here: an
/// invalid or expired token, or one without an identity claim, rejects the
/// upgrade outright.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match connection::verify_token(&query.token, &state.jwt_secret) {
        Some((user_id, username)) => ws
            .on_upgrade(move |socket| {
                connection::handle_connection(socket, state.presence, user_id, username)
            })
            .into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}
