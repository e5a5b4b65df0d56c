//! HTML pages rendered by the gate

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

use crate::gate::START_PATH;

const STYLE: &str = "body{font-family:-apple-system,Helvetica,Arial,sans-serif;\
background:#f4f5f7;color:#172b4d;margin:0}\
.box{max-width:420px;margin:12vh auto;padding:32px;background:#fff;\
border-radius:6px;box-shadow:0 1px 4px rgba(0,0,0,.15);text-align:center}\
h1{font-size:22px;margin:0 0 16px}\
a.button{display:inline-block;margin-top:16px;padding:10px 24px;background:#0052cc;\
color:#fff;text-decoration:none;border-radius:4px}";

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
<title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<div class=\"box\">\n{body}\n</div>\n</body>\n</html>\n",
        title = escape_html(title),
    )
}

/// Error page titled `"<code> <title>"` with a human-readable message.
pub fn error_page(status: StatusCode, title: &str, message: &str) -> Response {
    let heading = format!("{} {}", status.as_u16(), title);
    let body = format!(
        "<h1>{}</h1>\n<p>{}</p>\n<a class=\"button\" href=\"{START_PATH}\">Sign in again</a>",
        escape_html(&heading),
        escape_html(message),
    );
    (status, Html(layout(&heading, &body))).into_response()
}

/// Sign-in page linking to the start of the OAuth handshake.
pub fn sign_in_page(status: StatusCode, message: Option<&str>) -> Response {
    let message = message
        .map(|m| format!("<p>{}</p>\n", escape_html(m)))
        .unwrap_or_default();
    let body = format!(
        "<h1>Sign in</h1>\n{message}<a class=\"button\" href=\"{START_PATH}\">Sign in</a>"
    );
    (status, Html(layout("Sign In", &body))).into_response()
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
