use std::net::SocketAddr;

use axum::{routing, Router};
use freightflow::app::AppState;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "freightflow=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_state = AppState::new_from_env().await.unwrap();
    app_state.run_migration().await.unwrap();

    let api = Router::new().nest(
        "/v1",
        Router::new()
            .nest(
                "/auth",
                Router::new()
                    .route("/login", routing::post(freightflow::api::v1::auth::login))
                    .route("/logout", routing::post(freightflow::api::v1::auth::logout))
                    .route(
                        "/register",
                        routing::post(freightflow::api::v1::auth::register),
                    )
                    .route(
                        "/refresh",
                        routing::post(freightflow::api::v1::auth::refresh_access_token),
                    )
                    .route(
                        "/profile",
                        routing::get(freightflow::api::v1::auth::profile),
                    ),
            )
            .nest(
                "/load",
                Router::new()
                    .route("/", routing::get(freightflow::api::v1::load::index))
                    .route("/", routing::post(freightflow::api::v1::load::create))
                    .route("/:id", routing::get(freightflow::api::v1::load::show))
                    .route(
                        "/:id/status",
                        routing::put(freightflow::api::v1::load::update_status),
                    )
                    .route(
                        "/:id/location",
                        routing::put(freightflow::api::v1::load::update_location),
                    )
                    .route(
                        "/:id/alert",
                        routing::post(freightflow::api::v1::load::add_alert),
                    ),
            )
            .nest(
                "/bid",
                Router::new()
                    .route("/", routing::post(freightflow::api::v1::bid::create))
                    .route(
                        "/load/:id",
                        routing::get(freightflow::api::v1::bid::index_for_load),
                    )
                    .route(
                        "/trucker",
                        routing::get(freightflow::api::v1::bid::index_for_trucker),
                    )
                    .route(
                        "/:id/accept",
                        routing::put(freightflow::api::v1::bid::accept),
                    ),
            )
            .nest(
                "/benefit",
                Router::new()
                    .route("/", routing::get(freightflow::api::v1::benefit::index))
                    .route("/", routing::post(freightflow::api::v1::benefit::create))
                    .route(
                        "/eligible",
                        routing::get(freightflow::api::v1::benefit::eligible),
                    )
                    .route("/:id", routing::get(freightflow::api::v1::benefit::show))
                    .route("/:id", routing::put(freightflow::api::v1::benefit::update))
                    .route(
                        "/:id",
                        routing::delete(freightflow::api::v1::benefit::delete),
                    ),
            )
            .nest(
                "/account",
                Router::new()
                    .route("/", routing::get(freightflow::api::v1::account::index))
                    .route("/", routing::post(freightflow::api::v1::account::create))
                    .route("/:id", routing::get(freightflow::api::v1::account::show))
                    .route("/:id", routing::put(freightflow::api::v1::account::update)),
            ),
    );

    let app = Router::new()
        .nest("/api", api)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::debug!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .unwrap();
}
