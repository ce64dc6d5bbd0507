//! Serving a route's file from disk.

use crate::environment::RouteFile;
use crate::error::ResponseError;
use crate::template::{is_templatable, RequestData, TemplateEngine};
use bytes::Bytes;
use std::io;
use std::path::Path;
use tracing::debug;

const OCTET_STREAM: &str = "application/octet-stream";

/// Body and headers produced for a file route.
#[derive(Debug, Clone)]
pub struct FileResponse {
    pub body: Bytes,
    /// MIME type of the file, sent when no Content-Type was configured.
    pub content_type: String,
    /// `attachment` disposition unless the file is sent as the body.
    pub content_disposition: Option<String>,
}

/// MIME type for a file: the declared one, else inferred from the path.
pub fn effective_mime_type(file: &RouteFile, path: &str) -> String {
    let declared = file.mime_type.trim();
    if !declared.is_empty() {
        return declared.to_string();
    }
    mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}

/// Render the file path, read the file and render its content when the MIME
/// type is templatable.
pub async fn serve_file(
    file: &RouteFile,
    engine: &TemplateEngine,
    request: &RequestData,
) -> Result<FileResponse, ResponseError> {
    let path = engine.render(&file.path, request)?;
    let mime_type = effective_mime_type(file, &path);

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ResponseError::FileNotFound(path.clone()),
        _ => ResponseError::FileRead {
            path: path.clone(),
            message: e.to_string(),
        },
    })?;
    debug!("Serving file {} ({} bytes, {})", path, bytes.len(), mime_type);

    let body = if is_templatable(&mime_type) {
        let text = String::from_utf8_lossy(&bytes);
        Bytes::from(engine.render(&text, request)?)
    } else {
        Bytes::from(bytes)
    };

    let content_disposition = (!file.send_as_body).then(|| {
        let name = match file.filename.trim() {
            "" => Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            declared => declared.to_string(),
        };
        format!("attachment; filename=\"{name}\"")
    });

    Ok(FileResponse {
        body,
        content_type: mime_type,
        content_disposition,
    })
}
