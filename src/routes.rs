// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, ai, attempt, auth, dashboard, lifeline, profile, quiz, training},
    state::AppState,
    utils::{
        hackathon_lock::hackathon_lock,
        jwt::{admin_middleware, auth_middleware},
    },
};

/// Assembles the main application router.
///
/// * Public routes: registration, activation, login, password reset, colleges.
/// * User routes sit behind auth and the hackathon lock.
/// * Admin routes sit behind auth and the admin check.
pub fn create_router(state: AppState) -> Router {
    let mut origins = vec![
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];
    if let Ok(site) = HeaderValue::from_str(&state.config.site_url) {
        if !origins.contains(&site) {
            origins.push(site);
        }
    }

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/activate/{token}", get(auth::activate))
        .route("/login", post(auth::login))
        .route("/password-reset", post(auth::request_password_reset))
        .route("/password-reset/confirm", post(auth::confirm_password_reset));

    let quiz_routes = Router::new()
        .route("/", get(quiz::list_quizzes))
        .route("/{id}", get(quiz::get_quiz))
        .route("/{id}/redeem", post(quiz::redeem_quiz_coupon))
        .route("/{id}/start", post(quiz::start_quiz));

    let attempt_routes = Router::new()
        .route("/history", get(attempt::list_history))
        .route(
            "/{id}/questions/{question_id}",
            get(attempt::show_question).post(attempt::answer_question),
        )
        .route("/{id}/result", get(attempt::get_result))
        .route("/{id}/certificate", get(attempt::download_certificate));

    let ai_routes = Router::new()
        .route("/ask", post(ai::ask_tutor))
        .route("/analyze-progress", post(ai::analyze_progress))
        .route("/generate-quiz", post(ai::generate_quiz));

    let training_routes = Router::new()
        .route("/redeem", post(training::redeem_coupon))
        .route("/program", get(training::program_calendar))
        .route("/classes/{id}/join", post(training::join_class))
        .route("/payments", get(training::payment_history))
        .route("/subscriptions", get(training::subscriptions));

    // Auth runs first (outermost), then the hackathon lock.
    let user_routes = Router::new()
        .route("/api/profile", get(profile::get_profile).put(profile::update_profile))
        .route("/api/profile/password", put(profile::change_password))
        .route("/api/categories", get(quiz::list_categories))
        .route("/api/lifelines", post(lifeline::use_lifeline))
        .route("/api/dashboard", get(dashboard::get_dashboard))
        .route("/api/leaderboards", get(dashboard::list_leaderboards))
        .nest("/api/quizzes", quiz_routes)
        .nest("/api/attempts", attempt_routes)
        .nest("/api/ai", ai_routes)
        .nest("/api/training", training_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), hackathon_lock))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/users", get(admin::list_users))
        .route("/categories", post(admin::create_category))
        .route("/quizzes", get(admin::list_quizzes).post(admin::create_quiz))
        .route(
            "/quizzes/{id}",
            put(admin::update_quiz).delete(admin::delete_quiz),
        )
        .route("/quizzes/{id}/questions", post(admin::create_question))
        .route("/quizzes/{id}/results", get(admin::hackathon_results))
        .route("/questions/{id}", delete(admin::delete_question))
        .route("/workshops", post(admin::create_workshop))
        .route("/batches", post(admin::create_batch))
        .route("/classes", post(admin::create_class))
        .route("/classes/{id}", put(admin::update_class))
        .route("/coupons", get(admin::list_coupons).post(admin::create_coupon))
        .route("/coupons/{id}", put(admin::update_coupon))
        // Double middleware protection: Auth first, then Admin check
        .route_layer(middleware::from_fn(admin_middleware))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes)
        .route("/api/colleges", get(auth::list_colleges))
        .merge(user_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
