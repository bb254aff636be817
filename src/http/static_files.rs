use std::path::{Path, PathBuf};
use std::time::SystemTime;

use hyper::{Response, StatusCode, header};

use crate::http::body::{RespBody, full};
use crate::logging::syslog::trace;

const INDEX_FILES: [&str; 2] = ["index.html", "index.htm"];

/// Resolves `request_path` (already route-relative to `root`, per §4.J —
/// the requested path includes the route prefix) against `root` and serves
/// it if it exists, is a regular file (falling back to an index file for a
/// directory hit), and resolves to a path still under `root`. Returns
/// `None` when there is nothing to serve here, letting the caller fall
/// through to the next step of the static/proxy chain.
///
/// `if_modified_since` is the raw inbound header value, if any; a file
/// whose mtime is no newer than that timestamp short-circuits to a bodyless
/// 304 rather than re-sending the file.
pub async fn try_serve(root: &Path, request_path: &str, if_modified_since: Option<&str>) -> Option<Response<RespBody>> {
    let relative = request_path.trim_start_matches('/');
    let mut candidate = root.join(relative);

    if !path_is_safe(root, &candidate) {
        trace(format!("static path {} escapes root {}, refusing", candidate.display(), root.display()));
        return None;
    }

    let metadata = tokio::fs::metadata(&candidate).await.ok()?;

    if metadata.is_dir() {
        let mut found = None;
        for index in INDEX_FILES {
            let index_path = candidate.join(index);
            if tokio::fs::metadata(&index_path).await.map(|m| m.is_file()).unwrap_or(false) {
                found = Some(index_path);
                break;
            }
        }
        candidate = found?;
    } else if !metadata.is_file() {
        return None;
    }

    let metadata = tokio::fs::metadata(&candidate).await.ok()?;
    let mtime = metadata.modified().ok();

    if let (Some(mtime), Some(since)) = (mtime, if_modified_since) {
        if let Ok(client_time) = httpdate::parse_http_date(since) {
            if mtime.duration_since(SystemTime::UNIX_EPOCH).ok() <= client_time.duration_since(SystemTime::UNIX_EPOCH).ok() {
                let response = Response::builder().status(StatusCode::NOT_MODIFIED).header(header::LAST_MODIFIED, httpdate::fmt_http_date(mtime)).body(full(Vec::new())).ok()?;
                return Some(response);
            }
        }
    }

    let bytes = tokio::fs::read(&candidate).await.ok()?;
    let content_type = mime_guess::from_path(&candidate).first_or_octet_stream();

    let mut builder = Response::builder().status(StatusCode::OK).header(header::CONTENT_TYPE, content_type.as_ref());
    if let Some(mtime) = mtime {
        builder = builder.header(header::LAST_MODIFIED, httpdate::fmt_http_date(mtime));
    }
    let response = builder.body(full(bytes)).ok()?;

    Some(response)
}

fn path_is_safe(root: &Path, candidate: &Path) -> bool {
    // The file need not exist yet for this check — reject any ".." segment
    // outright rather than relying solely on canonicalize (which fails on
    // non-existent files).
    if candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return false;
    }
    match (std::fs::canonicalize(root), std::fs::canonicalize(candidate)) {
        (Ok(root_real), Ok(candidate_real)) => candidate_real.starts_with(&root_real),
        _ => true,
    }
}

pub fn public_dir(root: &Path) -> PathBuf {
    root.join("public")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tqserver-static-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        let mut f = std::fs::File::create(dir.join("style.css")).unwrap();
        writeln!(f, "body {{}}").unwrap();
        let mut idx = std::fs::File::create(dir.join("sub/index.html")).unwrap();
        writeln!(idx, "<html></html>").unwrap();
        dir
    }

    #[tokio::test]
    async fn serves_an_existing_file_with_inferred_mime_type() {
        let root = temp_root();
        let response = try_serve(&root, "/style.css", None).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/css");
        assert!(response.headers().get(header::LAST_MODIFIED).is_some());
    }

    #[tokio::test]
    async fn serves_index_html_for_a_directory_hit() {
        let root = temp_root();
        let response = try_serve(&root, "/sub", None).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn returns_none_for_a_missing_file() {
        let root = temp_root();
        assert!(try_serve(&root, "/missing.txt", None).await.is_none());
    }

    #[tokio::test]
    async fn refuses_a_traversal_attempt() {
        let root = temp_root();
        assert!(try_serve(&root, "/../../etc/passwd", None).await.is_none());
    }

    #[tokio::test]
    async fn not_modified_since_is_served_as_304() {
        let root = temp_root();
        let future = httpdate::fmt_http_date(SystemTime::now() + std::time::Duration::from_secs(60));
        let response = try_serve(&root, "/style.css", Some(&future)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn stale_if_modified_since_still_serves_the_file() {
        let root = temp_root();
        let past = httpdate::fmt_http_date(SystemTime::now() - std::time::Duration::from_secs(3600));
        let response = try_serve(&root, "/style.css", Some(&past)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
