use chrono::Utc;
use hyper::{Response, StatusCode, header};

use crate::http::body::{RespBody, full};

/// Dev-mode substitute for a worker's response while its last build failed.
/// Served with 200 so the browser renders it instead of its own connection
/// error page; the dev-reload script (served from the server's global
/// `public/` dir) still polls `/ws/reload` so the tab recovers automatically
/// once a rebuild succeeds.
pub fn render(worker_name: &str, error_text: &str) -> Response<RespBody> {
    let escaped = html_escape(error_text);
    let timestamp = Utc::now().to_rfc3339();

    let html = format!(
        "<!doctype html>\n<html>\n<head><title>Build failed: {name}</title></head>\n<body>\n<h1>Build failed: {name}</h1>\n<p>{ts}</p>\n<pre>{error}</pre>\n</body>\n</html>\n",
        name = html_escape(worker_name),
        ts = timestamp,
        error = escaped,
    );

    Response::builder().status(StatusCode::OK).header(header::CONTENT_TYPE, "text/html; charset=utf-8").body(full(html)).expect("static build-error response is always well-formed")
}

fn html_escape(input: &str) -> String {
    input.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn escapes_error_text_and_names_the_worker() {
        let response = render("blog", "<script>alert(1)</script>");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("Build failed: blog"));
        assert!(!text.contains("<script>alert"));
        assert!(text.contains("&lt;script&gt;"));
    }
}
