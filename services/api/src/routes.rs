use crate::infra::{
    run_blocking, session_cookie, session_id, AppState, FieldError, LookupRequest, ReturnsPortal,
    LOOKUP_FAILED,
};
use crate::views;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Extension, Form, Json, Router};
use chrono::NaiveDateTime;
use returns_portal::error::AppError;
use returns_portal::returns::{EligibilityRow, LineItem, Order, OrderSource, Returnability};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Serialize)]
pub(crate) struct LookupResponse {
    pub(crate) order_number: String,
    pub(crate) articles_url: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct OrderView {
    pub(crate) order_number: String,
    pub(crate) email: String,
    pub(crate) recipient: String,
    pub(crate) street: String,
    pub(crate) zip: String,
    pub(crate) city: String,
    pub(crate) purchased_at: NaiveDateTime,
    pub(crate) delivered_at: NaiveDateTime,
    pub(crate) return_window_days: u32,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        Self {
            order_number: order.order_number.clone(),
            email: order.email.clone(),
            recipient: order.recipient.clone(),
            street: order.street.clone(),
            zip: order.zip.clone(),
            city: order.city.clone(),
            purchased_at: order.purchased_at,
            delivered_at: order.delivered_at,
            return_window_days: order.return_window_days,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct EligibilityEntry {
    pub(crate) article: LineItem,
    pub(crate) returnable: Returnability,
    pub(crate) flag: String,
    pub(crate) reason: String,
    pub(crate) matched_rule: Option<String>,
    pub(crate) remaining_qty: u32,
    pub(crate) quantity_options: Vec<u32>,
    pub(crate) selectable: bool,
}

impl From<EligibilityRow> for EligibilityEntry {
    fn from(row: EligibilityRow) -> Self {
        Self {
            article: row.item,
            returnable: row.result.returnable,
            flag: row.result.flag,
            reason: row.result.reason,
            matched_rule: row.result.matched_rule_id,
            remaining_qty: row.remaining_qty,
            quantity_options: row.quantity_options,
            selectable: row.selectable,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ArticlesResponse {
    pub(crate) order: OrderView,
    pub(crate) results: Vec<EligibilityEntry>,
}

pub(crate) fn with_returns_routes<S>(portal: Arc<ReturnsPortal<S>>) -> Router
where
    S: OrderSource + 'static,
{
    returns_router(portal)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) fn returns_router<S>(portal: Arc<ReturnsPortal<S>>) -> Router
where
    S: OrderSource + 'static,
{
    Router::new()
        .route(
            "/returns/",
            get(lookup_form).post(lookup_form_submit::<S>),
        )
        .route("/returns/:order_number/articles/", get(articles_page::<S>))
        .route(
            "/api/returns/lookup/",
            axum::routing::post(lookup_endpoint::<S>),
        )
        .route(
            "/api/returns/:order_number/articles/",
            get(articles_endpoint::<S>),
        )
        .with_state(portal)
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

fn articles_url(order_number: &str) -> String {
    format!("/returns/{order_number}/articles/")
}

fn with_session(cookie: String, response: impl IntoResponse) -> Response {
    ([(header::SET_COOKIE, cookie)], response).into_response()
}

pub(crate) async fn lookup_form() -> Html<String> {
    Html(views::lookup_page(&LookupRequest::default(), &[], None))
}

pub(crate) async fn lookup_form_submit<S>(
    State(portal): State<Arc<ReturnsPortal<S>>>,
    headers: HeaderMap,
    Form(form): Form<LookupRequest>,
) -> Result<Response, AppError>
where
    S: OrderSource + 'static,
{
    let query = match form.validate() {
        Ok(query) => query,
        Err(errors) => return Ok(Html(views::lookup_page(&form, &errors, None)).into_response()),
    };

    let store = portal.clone();
    match run_blocking(move || store.lookup(&query)).await? {
        Some(order) => {
            let existing = session_id(&headers);
            let session = portal
                .sessions
                .verify(existing.as_deref(), &order.order_number);
            let redirect = Redirect::to(&articles_url(&order.order_number));
            Ok(with_session(session_cookie(&session), redirect))
        }
        None => Ok(Html(views::lookup_page(&form, &[], Some(LOOKUP_FAILED))).into_response()),
    }
}

pub(crate) async fn articles_page<S>(
    State(portal): State<Arc<ReturnsPortal<S>>>,
    Path(order_number): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError>
where
    S: OrderSource + 'static,
{
    if !portal.sessions.allows(&headers, &order_number) {
        info!(%order_number, "articles page requested without a verified session");
        return Ok(Redirect::to("/returns/").into_response());
    }

    let store = portal.clone();
    match run_blocking(move || store.articles(&order_number)).await? {
        Some((order, rows)) => Ok(Html(views::articles_page(&order, &rows)).into_response()),
        None => Ok(Redirect::to("/returns/").into_response()),
    }
}

fn bad_request(detail: &str, errors: &[FieldError]) -> Response {
    let mut payload = json!({ "detail": detail });
    if !errors.is_empty() {
        let fields: serde_json::Map<String, serde_json::Value> = errors
            .iter()
            .map(|error| (error.field.to_string(), json!([error.message])))
            .collect();
        payload["errors"] = serde_json::Value::Object(fields);
    }
    (StatusCode::BAD_REQUEST, Json(payload)).into_response()
}

pub(crate) async fn lookup_endpoint<S>(
    State(portal): State<Arc<ReturnsPortal<S>>>,
    headers: HeaderMap,
    payload: Result<Json<LookupRequest>, JsonRejection>,
) -> Result<Response, AppError>
where
    S: OrderSource + 'static,
{
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => return Ok(bad_request(&rejection.body_text(), &[])),
    };
    let query = match request.validate() {
        Ok(query) => query,
        Err(errors) => return Ok(bad_request("Invalid lookup request.", &errors)),
    };

    let store = portal.clone();
    let Some(order) = run_blocking(move || store.lookup(&query)).await? else {
        return Ok(bad_request(LOOKUP_FAILED, &[]));
    };

    let existing = session_id(&headers);
    let session = portal
        .sessions
        .verify(existing.as_deref(), &order.order_number);
    let body = LookupResponse {
        articles_url: format!("/api/returns/{}/articles/", order.order_number),
        order_number: order.order_number,
    };
    Ok(with_session(session_cookie(&session), Json(body)))
}

pub(crate) async fn articles_endpoint<S>(
    State(portal): State<Arc<ReturnsPortal<S>>>,
    Path(order_number): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError>
where
    S: OrderSource + 'static,
{
    if !portal.sessions.allows(&headers, &order_number) {
        let payload = json!({ "detail": "Order not verified for this session." });
        return Ok((StatusCode::FORBIDDEN, Json(payload)).into_response());
    }

    let store = portal.clone();
    let Some((order, rows)) = run_blocking(move || store.articles(&order_number)).await? else {
        let payload = json!({ "detail": "Order not found." });
        return Ok((StatusCode::NOT_FOUND, Json(payload)).into_response());
    };

    let body = ArticlesResponse {
        order: OrderView::from(&order),
        results: rows.into_iter().map(EligibilityEntry::from).collect(),
    };
    Ok(Json(body).into_response())
}
