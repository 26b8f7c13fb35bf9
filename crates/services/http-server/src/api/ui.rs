//! Static control page

use axum::response::Html;

const UI_PAGE: &str = include_str!("../../static/ui.html");

/// GET /ui
pub async fn index() -> Html<&'static str> {
    Html(UI_PAGE)
}
