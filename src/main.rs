use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roadguard::{
    api::v1::{auth, incident, profile, provider},
    app::AppState,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roadguard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = AppState::new_from_env()
        .await
        .expect("cannot initialize application state");

    let auth = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/login/google", post(auth::login_with_google))
        .route("/logout", post(auth::logout))
        .route("/refresh", post(auth::refresh_access_token))
        .route("/verify-email", post(auth::verify_email))
        .route("/resend-verification", post(auth::resend_verification))
        .route("/session", get(auth::session));

    let incident = Router::new()
        .route("/", get(incident::index).post(incident::create))
        .route("/:id", patch(incident::update).delete(incident::delete));

    let app = Router::new()
        .nest("/api/v1/auth", auth)
        .nest("/api/v1/incident", incident)
        .route("/api/v1/profile", get(profile::show))
        .route("/api/v1/provider", get(provider::index))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|it| it.parse().ok())
        .unwrap_or(8080u16);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .expect("server error");
}
