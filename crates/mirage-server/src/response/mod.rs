//! Response construction: builder, header rules and file serving.

mod builder;
mod file;
mod headers;

pub use builder::{
    cors_preflight_response, error_response, not_found_response, text_response, ResponseBuilder,
};
pub use file::{effective_mime_type, serve_file, FileResponse};
pub use headers::{
    content_type, is_valid_header, mime_essence, resolve_headers, CORS_HEADERS, TEXT_PLAIN,
};
