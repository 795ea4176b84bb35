//! Credential transport: bearer header and access cookie.

use axum::http::{HeaderMap, header};

/// Cookie name for the access token. Same name the JSON body uses.
pub const ACCESS_COOKIE_NAME: &str = "token";

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// The candidate access token: bearer header first, then the access cookie.
pub fn credential_from_headers(headers: &HeaderMap) -> Option<&str> {
    bearer_token(headers).or_else(|| {
        get_cookie(headers, ACCESS_COOKIE_NAME).filter(|token| !token.is_empty())
    })
}

/// `Set-Cookie` value carrying an access token that expires with the token.
pub fn access_cookie(token: &str, max_age_secs: u64, secure: bool) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=None; Path=/; Max-Age={}{}",
        ACCESS_COOKIE_NAME,
        token,
        max_age_secs,
        secure_attr(secure)
    )
}

/// `Set-Cookie` value removing the access cookie.
pub fn clear_access_cookie(secure: bool) -> String {
    format!(
        "{}=; HttpOnly; SameSite=None; Path=/; Max-Age=0{}",
        ACCESS_COOKIE_NAME,
        secure_attr(secure)
    )
}

fn secure_attr(secure: bool) -> &'static str {
    if secure { "; Secure" } else { "" }
}
