use axum::extract::{Path, State};
use axum::response::Html;
use framefox::AppState;
use framefox::error::FrameworkError;
use framefox::routing::{Controller, Routes};
use serde_json::json;

pub struct {{ pascal }}Controller;

impl Controller for {{ pascal }}Controller {
    fn routes(&self, routes: &mut Routes<AppState>) {
        routes
            .get("/{{ url }}", "{{ snake }}_index", index)
            .get("/{{ url }}/{id}", "{{ snake }}_show", show);
    }
}

async fn index(State(state): State<AppState>) -> Result<Html<String>, FrameworkError> {
    state.render("{{ snake }}/index.html", json!({ "title": "{{ pascal }}" }))
}

async fn show(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Html<String>, FrameworkError> {
    state.render("{{ snake }}/show.html", json!({ "title": "{{ pascal }}", "id": id }))
}
