//! Static directory serving.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::error;

use crate::request::Request;
use crate::response::{ContentType, Response};
use crate::status::Status;

/// Serves files under one root directory.
///
/// Mounted by [`App::static_files`](crate::App::static_files); the tail of
/// the URL comes from the `filepath` catch-all parameter.
pub(crate) struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(crate) async fn serve(&self, req: Request) -> Response {
        let tail = req.param("filepath").unwrap_or("");
        let Some(mut path) = self.map_path(tail) else {
            return not_found();
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => path.push("index.html"),
            Ok(_) => {}
            Err(e) => return io_failure(&path, e),
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => Response::builder().bytes(content_type(&path), bytes),
            Err(e) => io_failure(&path, e),
        }
    }

    /// Resolves a URL tail below the root; `None` for anything that would
    /// escape it.
    fn map_path(&self, url_path: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for component in Path::new(url_path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(path)
    }
}

fn content_type(path: &Path) -> ContentType {
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "css" => ContentType::Css,
        "htm" | "html" => ContentType::Html,
        "js" | "mjs" => ContentType::Javascript,
        "json" => ContentType::Json,
        "pdf" => ContentType::Pdf,
        "png" => ContentType::Png,
        "svg" => ContentType::Svg,
        "md" | "txt" => ContentType::Text,
        "xml" => ContentType::Xml,
        _ => ContentType::OctetStream,
    }
}

fn io_failure(path: &Path, e: io::Error) -> Response {
    match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => not_found(),
        io::ErrorKind::PermissionDenied => Response::error(Status::Forbidden, "403 Forbidden"),
        _ => {
            error!(path = %path.display(), "static file read failed: {e}");
            Response::error(Status::InternalServerError, "500 Internal Server Error")
        }
    }
}

fn not_found() -> Response {
    Response::error(Status::NotFound, "404 page not found")
}
