//! Refresh token cookie

use axum::http::{header, HeaderMap, HeaderValue};

pub const REFRESH_COOKIE: &str = "refreshToken";

/// Cookie is only sent back to the auth endpoints
const COOKIE_PATH: &str = "/api/v1/auth";

fn render(value: &str, max_age_secs: u64, secure: bool) -> Option<HeaderValue> {
    let mut cookie = format!(
        "{}={}; HttpOnly; SameSite=Strict; Path={}; Max-Age={}",
        REFRESH_COOKIE, value, COOKIE_PATH, max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).ok()
}

/// `Set-Cookie` value carrying a refresh token
pub fn refresh_cookie(token: &str, max_age_secs: u64, secure: bool) -> Option<HeaderValue> {
    render(token, max_age_secs, secure)
}

/// `Set-Cookie` value that removes the refresh token from the browser
pub fn clear_refresh_cookie(secure: bool) -> HeaderValue {
    render("", 0, secure).unwrap_or_else(|| HeaderValue::from_static("refreshToken=; Max-Age=0"))
}

/// Read the refresh token from the `Cookie` header(s)
pub fn read_refresh_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == REFRESH_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
