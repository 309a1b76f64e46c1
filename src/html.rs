use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use tracing::error;

use crate::error::ApiError;

const PAGE_STYLE: &str = "\
body { font-family: monospace; padding: 20px; background: #0f172a; color: #e2e8f0; }
pre { background: #1e293b; padding: 15px; border-radius: 8px; white-space: pre-wrap; word-wrap: break-word; }
a { color: #38bdf8; }";

/// Escape the five HTML-significant characters.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <title>{title}</title>\n\
         <style>\n{PAGE_STYLE}\n</style>\n\
         </head>\n\
         <body>\n{body}\n</body>\n\
         </html>\n"
    )
}

/// Page showing a paste's content.
pub fn paste_page(content: &str, new_paste_url: &str) -> String {
    page(
        "View Paste",
        &format!(
            "<h1>Paste Content</h1>\n\
             <pre>{content}</pre>\n\
             <hr>\n\
             <a href=\"{link}\">Create New Paste</a>",
            content = escape(content),
            link = escape(new_paste_url),
        ),
    )
}

/// Page for unknown, expired and exhausted pastes alike.
pub fn not_found_page(new_paste_url: &str) -> String {
    page(
        "Paste Not Found",
        &format!(
            "<h1>404 Paste Not Found or Expired</h1>\n\
             <a href=\"{link}\">Create New Paste</a>",
            link = escape(new_paste_url),
        ),
    )
}

pub fn internal_error_page() -> String {
    page("Internal Server Error", "<h1>Internal Server Error</h1>")
}

/// Error raised from an HTML route; renders as a page instead of JSON.
#[derive(Debug)]
pub struct HtmlError {
    pub error: ApiError,
    pub new_paste_url: String,
}

impl IntoResponse for HtmlError {
    fn into_response(self) -> Response {
        let status_code = self.error.status_code();
        let body = match status_code {
            StatusCode::NOT_FOUND => not_found_page(&self.new_paste_url),
            _ => {
                error!(error = ?self.error, "failed to render paste page");
                internal_error_page()
            }
        };
        (status_code, Html(body)).into_response()
    }
}
