use axum::{
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "webui"]
struct Assets;

pub fn ui_router() -> Router {
    Router::new().route("/", get(index))
}

async fn index() -> impl IntoResponse {
    match Assets::get("index.html") {
        Some(content) => {
            let body = String::from_utf8_lossy(content.data.as_ref()).into_owned();
            let mut res = Html(body).into_response();
            res.headers_mut().insert(
                header::CACHE_CONTROL,
                header::HeaderValue::from_static("no-cache"),
            );
            res
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
