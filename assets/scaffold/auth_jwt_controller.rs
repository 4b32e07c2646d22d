use axum::Json;
use axum::extract::State;
use framefox::AppState;
use framefox::error::FrameworkError;
use framefox::routing::{Controller, Routes};
use framefox::security::CurrentUser;
use serde::Deserialize;
use serde_json::{Value, json};

pub struct SecurityController;

impl Controller for SecurityController {
    fn routes(&self, routes: &mut Routes<AppState>) {
        routes
            .post("{{ login_path }}", "security_token", token)
            .get("{{ prefix }}/me", "security_me", me);
    }
}

#[derive(Deserialize)]
struct TokenRequest {
    email: String,
    password: String,
}

/// 用户名密码换取 Bearer token
async fn token(State(state): State<AppState>, Json(body): Json<TokenRequest>) -> Result<Json<Value>, FrameworkError> {
    let invalid = || FrameworkError::Unauthorized("Invalid credentials.".to_string());
    let provider = state
        .security
        .provider("{{ provider }}")
        .ok_or_else(|| FrameworkError::Internal(anyhow::anyhow!("user provider {{ provider }} is not configured")))?;

    let user = provider.load_user(&body.email).await?.ok_or_else(invalid)?;
    let hash = user.password_hash.as_deref().ok_or_else(invalid)?;
    if !state.security.hasher().verify(&body.password, hash) {
        return Err(invalid());
    }

    let (token, expires_in) = state.security.jwt().issue(&user.identifier, &user.roles)?;
    Ok(Json(json!({
        "token": token,
        "token_type": "Bearer",
        "expires_in": expires_in,
    })))
}

async fn me(CurrentUser(user): CurrentUser) -> Json<Value> {
    Json(json!({ "identifier": user.identifier, "roles": user.roles }))
}
