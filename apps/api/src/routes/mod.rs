pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};

use crate::auth::rate_limit::rate_limit;
use crate::state::AppState;
use crate::{
    admin, applications, auth, evaluations, notifications, opportunities, realtime, students,
};

fn api_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        // Accounts
        .route("/auth/register", post(auth::handlers::handle_register))
        .route("/auth/login", post(auth::handlers::handle_login))
        .route("/auth/me", get(auth::handlers::handle_me))
        // Students
        .route(
            "/students/me",
            get(students::handlers::handle_get_profile)
                .put(students::handlers::handle_update_profile),
        )
        .route(
            "/students/me/resume",
            post(students::handlers::handle_upload_resume)
                .layer(DefaultBodyLimit::max(state.config.max_resume_bytes)),
        )
        .route(
            "/students/me/resume/url",
            post(students::handlers::handle_resume_from_url),
        )
        .route(
            "/students/me/applications",
            get(students::handlers::handle_my_applications),
        )
        .route(
            "/students/:id/evaluations",
            get(evaluations::handlers::handle_student_evaluations),
        )
        // Opportunities and applications
        .route(
            "/opportunities",
            get(opportunities::handlers::handle_list_opportunities)
                .post(opportunities::handlers::handle_create_opportunity),
        )
        .route(
            "/opportunities/:id",
            get(opportunities::handlers::handle_get_opportunity),
        )
        .route(
            "/opportunities/:id/apply",
            post(applications::handlers::handle_apply),
        )
        .route(
            "/opportunities/:id/shortlist",
            get(applications::handlers::handle_shortlist),
        )
        .route(
            "/company/applicants",
            get(applications::handlers::handle_company_applicants),
        )
        .route(
            "/applications/:id/status",
            patch(applications::handlers::handle_update_status),
        )
        // Evaluations and notifications
        .route(
            "/evaluations",
            post(evaluations::handlers::handle_create_evaluation),
        )
        .route(
            "/notifications",
            get(notifications::handlers::handle_list_notifications),
        )
        .route(
            "/notifications/:id/read",
            patch(notifications::handlers::handle_mark_read),
        )
        // Moderation
        .route("/admin/users", get(admin::handlers::handle_list_users))
        .route(
            "/admin/users/:id/approve",
            post(admin::handlers::handle_approve_user),
        )
        .route(
            "/admin/users/:id/reject",
            post(admin::handlers::handle_reject_user),
        )
        .route(
            "/admin/opportunities/:id",
            delete(admin::handlers::handle_deactivate_opportunity),
        )
        .route("/admin/audit-log", get(admin::handlers::handle_audit_log))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/ws", get(realtime::socket::handle_ws))
        .nest("/api/v1", api_routes(&state))
        .with_state(state)
}
