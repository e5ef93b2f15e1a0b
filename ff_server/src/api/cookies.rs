//! Auth cookie formatting and parsing.

use axum::http::{HeaderMap, header};
use feedfinder::auth::SessionTokens;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";
pub const CSRF_SESSION_COOKIE: &str = "csrf_session";

/// `HttpOnly; SameSite=Lax` cookie on `/`; a negative or zero age clears it
pub fn build_cookie(name: &str, value: &str, max_age: i64, secure: bool) -> String {
    let secure_attr = if secure { "; Secure" } else { "" };
    format!(
        "{name}={value}; HttpOnly; Path=/; SameSite=Lax; Max-Age={max_age}{secure_attr}",
        max_age = max_age.max(0),
    )
}

/// Session cookie that expires when the browser closes
pub fn build_session_cookie(name: &str, value: &str, secure: bool) -> String {
    let secure_attr = if secure { "; Secure" } else { "" };
    format!("{name}={value}; HttpOnly; Path=/; SameSite=Lax{secure_attr}")
}

pub fn clear_cookie(name: &str, secure: bool) -> String {
    build_cookie(name, "", 0, secure)
}

/// The access and refresh cookies for a fresh session
pub fn session_cookies(
    tokens: &SessionTokens,
    access_max_age: i64,
    refresh_max_age: i64,
    secure: bool,
) -> [String; 2] {
    [
        build_cookie(ACCESS_COOKIE, &tokens.access_token, access_max_age, secure),
        build_cookie(REFRESH_COOKIE, &tokens.refresh_token, refresh_max_age, secure),
    ]
}

pub fn clear_session_cookies(secure: bool) -> [String; 2] {
    [
        clear_cookie(ACCESS_COOKIE, secure),
        clear_cookie(REFRESH_COOKIE, secure),
    ]
}

/// Value of a named cookie from the `Cookie` request headers
pub fn cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|raw| raw.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|part| part.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_cookie_attributes() {
        let cookie = build_cookie(ACCESS_COOKIE, "abc", 3600, true);
        assert_eq!(
            cookie,
            "access_token=abc; HttpOnly; Path=/; SameSite=Lax; Max-Age=3600; Secure"
        );

        let insecure = build_cookie(REFRESH_COOKIE, "xyz", 604_800, false);
        assert!(insecure.ends_with("Max-Age=604800"));
        assert!(!insecure.contains("Secure"));
    }

    #[test]
    fn test_clear_cookie() {
        assert!(clear_cookie(ACCESS_COOKIE, true).starts_with("access_token=; "));
        assert!(clear_cookie(ACCESS_COOKIE, true).contains("Max-Age=0"));
    }

    #[test]
    fn test_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; access_token=tok123; csrf_session="),
        );

        assert_eq!(cookie_value(&headers, ACCESS_COOKIE).as_deref(), Some("tok123"));
        assert_eq!(cookie_value(&headers, "theme").as_deref(), Some("dark"));
        assert!(cookie_value(&headers, CSRF_SESSION_COOKIE).is_none());
        assert!(cookie_value(&headers, REFRESH_COOKIE).is_none());
    }
}
