#![allow(clippy::needless_for_each)]

use super::handlers::{self, auth, captcha, health, throttle};
use crate::auth::captcha::CodeInput;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";
pub const SWAGGER_UI_PATH: &str = "/swagger-ui";

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::login,
        auth::register,
        auth::logout,
        auth::session,
        captcha::generate,
        captcha::verify
    ),
    components(
        schemas(
            health::Health,
            handlers::ErrorBody,
            throttle::RateLimitedBody,
            auth::LoginRequest,
            auth::LoginResponse,
            auth::RegisterRequest,
            auth::UserResponse,
            auth::UserView,
            captcha::GenerateRequest,
            captcha::GenerateResponse,
            captcha::VerifyRequest,
            captcha::VerifyResponse,
            CodeInput
        )
    ),
    tags(
        (name = "health", description = "Liveness of the service and its dependencies"),
        (name = "auth", description = "Login, registration and sessions"),
        (name = "captcha", description = "One-time verification codes"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info.title = env!("CARGO_PKG_NAME").to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    doc.info.description = Some(env!("CARGO_PKG_DESCRIPTION").to_string());
    doc
}

/// Swagger UI serving the document at [`OPENAPI_JSON_PATH`].
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new(SWAGGER_UI_PATH).url(OPENAPI_JSON_PATH, openapi())
}
