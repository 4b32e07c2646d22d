use axum::extract::{Path, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use framefox::AppState;
use framefox::error::FrameworkError;
use framefox::form::{CSRF_FIELD, Form, FormInput, FormType};
use framefox::routing::{Controller, Routes};
use framefox::security::{Session, csrf_token, verify_csrf};
use serde_json::json;

use crate::entities::{{ snake }}::{{ pascal }};
use crate::forms::{{ snake }}_form::{{ pascal }}Type;

pub struct {{ pascal }}Controller;

impl Controller for {{ pascal }}Controller {
    fn routes(&self, routes: &mut Routes<AppState>) {
        routes
            .get("/{{ url }}", "{{ snake }}_index", index)
            .get("/{{ url }}/new", "{{ snake }}_new", new_form)
            .post("/{{ url }}/new", "{{ snake }}_create", create)
            .get("/{{ url }}/{id}", "{{ snake }}_show", show)
            .get("/{{ url }}/{id}/edit", "{{ snake }}_edit", edit_form)
            .post("/{{ url }}/{id}/edit", "{{ snake }}_update", update)
            .post("/{{ url }}/{id}/delete", "{{ snake }}_delete", delete);
    }
}

fn render_form(state: &AppState, template: &str, form: &Form, id: Option<i64>) -> Result<Html<String>, FrameworkError> {
    state.render(template, json!({ "form": form.render(), "id": id }))
}

fn redirect_to_show(state: &AppState, id: Option<i64>) -> Result<Response, FrameworkError> {
    let id = id.unwrap_or_default().to_string();
    let url = state.url_for("{{ snake }}_show", &[("id", id.as_str())])?;
    Ok(Redirect::to(&url).into_response())
}

async fn index(State(state): State<AppState>, session: Session) -> Result<Html<String>, FrameworkError> {
    let items = state.repository::<{{ pascal }}>().find_all()?;
    state.render(
        "{{ snake }}/index.html",
        json!({
            "items": items,
            "flashes": session.take_all_flashes(),
            "csrf_token": csrf_token(&session),
        }),
    )
}

async fn new_form(State(state): State<AppState>, session: Session) -> Result<Html<String>, FrameworkError> {
    let form = {{ pascal }}Type.create_with_csrf(csrf_token(&session));
    render_form(&state, "{{ snake }}/new.html", &form, None)
}

async fn create(State(state): State<AppState>, session: Session, input: FormInput) -> Result<Response, FrameworkError> {
    let mut form = {{ pascal }}Type.create_with_csrf(csrf_token(&session));
    form.handle_request(input);
    if !form.is_valid() {
        return Ok(render_form(&state, "{{ snake }}/new.html", &form, None)?.into_response());
    }

    let mut item: {{ pascal }} = form.into_data()?;
    state.repository::<{{ pascal }}>().persist(&mut item)?;
    session.flash("success", "{{ pascal }} created.");
    redirect_to_show(&state, item.id)
}

async fn show(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Html<String>, FrameworkError> {
    let item = state.repository::<{{ pascal }}>().find_or_fail(id)?;
    state.render("{{ snake }}/show.html", json!({ "item": item }))
}

async fn edit_form(State(state): State<AppState>, session: Session, Path(id): Path<i64>) -> Result<Html<String>, FrameworkError> {
    let item = state.repository::<{{ pascal }}>().find_or_fail(id)?;
    let mut form = {{ pascal }}Type.create_with_csrf(csrf_token(&session));
    let data = serde_json::to_value(&item).map_err(|e| FrameworkError::Internal(e.into()))?;
    form.set_data(&data)?;
    render_form(&state, "{{ snake }}/edit.html", &form, Some(id))
}

async fn update(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
    input: FormInput,
) -> Result<Response, FrameworkError> {
    let repository = state.repository::<{{ pascal }}>();
    let existing = repository.find_or_fail(id)?;
    let mut form = {{ pascal }}Type.create_with_csrf(csrf_token(&session));
    form.handle_request(input);
    if !form.is_valid() {
        return Ok(render_form(&state, "{{ snake }}/edit.html", &form, Some(id))?.into_response());
    }

    let mut item: {{ pascal }} = form.into_data()?;
    item.id = existing.id;
    repository.persist(&mut item)?;
    session.flash("success", "{{ pascal }} updated.");
    redirect_to_show(&state, item.id)
}

async fn delete(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
    input: FormInput,
) -> Result<Response, FrameworkError> {
    if !verify_csrf(&session, input.get(CSRF_FIELD)) {
        return Err(FrameworkError::Forbidden("Invalid CSRF token.".to_string()));
    }
    let repository = state.repository::<{{ pascal }}>();
    let item = repository.find_or_fail(id)?;
    repository.remove(&item)?;
    session.flash("success", "{{ pascal }} deleted.");
    let url = state.url_for("{{ snake }}_index", &[])?;
    Ok(Redirect::to(&url).into_response())
}
