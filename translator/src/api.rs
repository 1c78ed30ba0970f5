use crate::config::Listener as ListenerConfig;
use crate::handler::{TranslateError, TranslateHandler, text_from_body};
use crate::metrics_defs::{TRANSLATE_DURATION, TRANSLATE_REQUESTS};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use shared::{counter, histogram};
use std::time::Instant;
use tokio::net::TcpListener;

/// Request bodies are not capped here; the size limit belongs to the host.
pub fn router(handler: TranslateHandler) -> Router {
    Router::new()
        .route("/translate", post(translate_body).get(translate_query))
        .layer(DefaultBodyLimit::disable())
        .with_state(handler)
}

pub async fn bind(listener: &ListenerConfig) -> std::io::Result<TcpListener> {
    let addr = format!("{}:{}", listener.host, listener.port);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "translate endpoint listening");
    Ok(listener)
}

pub async fn serve(listener: TcpListener, handler: TranslateHandler) -> std::io::Result<()> {
    axum::serve(listener, router(handler)).await
}

#[derive(Serialize)]
struct TranslateResponse {
    translated_text: String,
}

impl IntoResponse for TranslateResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[derive(Deserialize, Debug)]
struct Params {
    text: Option<String>,
}

async fn translate_body(State(handler): State<TranslateHandler>, body: Bytes) -> Response {
    let start = Instant::now();
    tracing::info!(bytes = body.len(), "translate request received");
    let result = match text_from_body(&body) {
        Ok(text) => handler.translate(&text).await,
        Err(e) => Err(e),
    };
    respond(start, result)
}

async fn translate_query(
    State(handler): State<TranslateHandler>,
    params: Result<Query<Params>, QueryRejection>,
) -> Response {
    let start = Instant::now();
    tracing::info!("translate query received");

    // Unparseable query strings, such as a repeated text key, get the same
    // answer as a missing one.
    let text = params.ok().and_then(|Query(params)| params.text);
    let result = match text.filter(|text| !text.is_empty()) {
        Some(text) => handler.translate(&text).await,
        None => Err(TranslateError::MissingText),
    };
    respond(start, result)
}

fn respond(start: Instant, result: Result<String, TranslateError>) -> Response {
    let response = result
        .map(|translated_text| TranslateResponse { translated_text })
        .into_response();

    let status = response.status().as_u16().to_string();
    counter!(TRANSLATE_REQUESTS, "status" => status).increment(1);
    histogram!(TRANSLATE_DURATION).record(start.elapsed().as_secs_f64());

    response
}

impl IntoResponse for TranslateError {
    fn into_response(self) -> Response {
        let status = match self {
            TranslateError::InvalidJson | TranslateError::MissingText => StatusCode::BAD_REQUEST,
            TranslateError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            TranslateError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}
