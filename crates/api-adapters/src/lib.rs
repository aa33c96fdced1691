//! # api-adapters
//!
//! HTTP and WebSocket surface of the forum (feature `web-axum`), plus the
//! in-process room hub that implements the `EventPublisher` port.

pub mod realtime;

#[cfg(feature = "web-axum")]
pub mod error;
#[cfg(feature = "web-axum")]
pub mod extract;
#[cfg(feature = "web-axum")]
pub mod handlers;
#[cfg(feature = "web-axum")]
pub mod multipart;
#[cfg(feature = "web-axum")]
pub mod state;

pub use realtime::RoomHub;

#[cfg(feature = "web-axum")]
pub use router::{router, RouterOptions};
#[cfg(feature = "web-axum")]
pub use state::AppState;

#[cfg(feature = "web-axum")]
mod router {
    use std::path::PathBuf;

    use axum::{
        extract::DefaultBodyLimit,
        http::{HeaderValue, Method},
        routing::{get, patch, post, put},
        Router,
    };
    use tower::ServiceBuilder;
    use tower_http::{
        compression::CompressionLayer,
        cors::{AllowOrigin, Any, CorsLayer},
        request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
        services::ServeDir,
        trace::TraceLayer,
    };
    use tracing::warn;

    use crate::handlers::{auth, chat, comments, health, media, notifications, posts, users, votes};
    use crate::realtime::ws;
    use crate::state::AppState;

    #[derive(Debug, Clone)]
    pub struct RouterOptions {
        /// Empty allows any origin.
        pub cors_origins: Vec<String>,
        pub max_upload_bytes: usize,
        /// `(url prefix, directory)` to serve stored uploads from.
        pub uploads: Option<(String, PathBuf)>,
    }

    impl Default for RouterOptions {
        fn default() -> Self {
            Self {
                cors_origins: Vec::new(),
                max_upload_bytes: 50 * 1024 * 1024,
                uploads: None,
            }
        }
    }

    fn cors(origins: &[String]) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
            ])
            .allow_headers(Any);
        if origins.is_empty() {
            return layer.allow_origin(Any);
        }
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "ignoring unparsable CORS origin");
                    None
                }
            })
            .collect();
        layer.allow_origin(AllowOrigin::list(parsed))
    }

    fn api() -> Router<AppState> {
        Router::new()
            .route("/auth/register", post(auth::register))
            .route("/auth/login", post(auth::login))
            .route("/auth/me", get(auth::me))
            .route("/users", get(users::list_users))
            .route("/users/search", get(users::search_users))
            .route(
                "/users/{id}",
                get(users::get_user).put(users::update_user).delete(users::delete_user),
            )
            .route("/posts", get(posts::list_posts).post(posts::create_post))
            .route(
                "/posts/{id}",
                get(posts::get_post).put(posts::update_post).delete(posts::delete_post),
            )
            .route("/posts/{id}/flags", patch(posts::set_flags))
            .route("/comments", post(comments::create_comment))
            .route("/comments/post/{id}", get(comments::list_comments))
            .route(
                "/comments/{id}",
                put(comments::update_comment).delete(comments::delete_comment),
            )
            .route("/votes", post(votes::cast_vote))
            .route(
                "/votes/{id}",
                put(votes::change_vote).delete(votes::remove_vote),
            )
            .route("/media/upload", post(media::upload_media))
            .route("/media/reorder", patch(media::reorder_media))
            .route("/media/post/{id}", get(media::list_media))
            .route("/media/{id}", axum::routing::delete(media::delete_media))
            .route("/media/{id}/caption", patch(media::update_caption))
            .route("/notifications", get(notifications::list_notifications))
            .route("/notifications/unread-count", get(notifications::unread_count))
            .route("/notifications/read-all", put(notifications::mark_all_read))
            .route("/notifications/{id}/read", put(notifications::mark_read))
            .route(
                "/notifications/{id}",
                axum::routing::delete(notifications::delete_notification),
            )
            .route("/chat/conversations", get(chat::list_conversations))
            .route("/chat/conversations/{id}", post(chat::open_conversation))
            .route(
                "/chat/conversations/{id}/messages",
                get(chat::get_messages).post(chat::send_message),
            )
            .route("/chat/unread-count", get(chat::unread_count))
    }

    /// The full application: `/api`, `/ws`, `/health` and optionally the
    /// uploads directory.
    pub fn router(state: AppState, options: &RouterOptions) -> Router {
        let mut app = Router::new()
            .nest("/api", api())
            .route("/ws", get(ws::ws_handler))
            .route("/health", get(health));

        if let Some((prefix, dir)) = &options.uploads {
            app = app.nest_service(prefix, ServeDir::new(dir));
        }

        app.layer(DefaultBodyLimit::max(options.max_upload_bytes))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(CompressionLayer::new())
                    .layer(cors(&options.cors_origins)),
            )
            .with_state(state)
    }
}
