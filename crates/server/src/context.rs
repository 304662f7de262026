use axum::http::header::{COOKIE, USER_AGENT};
use axum::http::HeaderMap;
use botsense_bot_detect::beacon::extract_cookie;
use botsense_bot_detect::{identity_key, mint_session_cookie};
use botsense_common::ServerConfig;
use std::net::{IpAddr, SocketAddr};

/// Per-request facts the public handlers work from.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client_ip: IpAddr,
    /// `None` when the header is absent or not valid text.
    pub user_agent: Option<String>,
    pub session_key: String,
    /// Set when the client arrived without a session cookie and one was
    /// minted for it.
    pub new_cookie: Option<String>,
}

impl RequestContext {
    pub fn from_request(headers: &HeaderMap, peer: SocketAddr, server: &ServerConfig) -> Self {
        let client_ip = client_ip(headers, peer, server.trust_forwarded_for);

        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let existing = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|h| extract_cookie(h, &server.session_cookie))
            .filter(|c| !c.is_empty());

        let (cookie, new_cookie) = match existing {
            Some(cookie) => (cookie, None),
            None => {
                let minted = mint_session_cookie();
                (minted.clone(), Some(minted))
            }
        };

        Self {
            client_ip,
            user_agent,
            session_key: identity_key(&client_ip.to_string(), Some(&cookie)),
            new_cookie,
        }
    }

    /// `Set-Cookie` value for a freshly minted session cookie.
    pub fn set_cookie(&self, cookie_name: &str) -> Option<String> {
        self.new_cookie
            .as_ref()
            .map(|value| format!("{cookie_name}={value}; Path=/; HttpOnly; SameSite=Lax"))
    }
}

/// Client IP from the first `X-Forwarded-For` hop when trusted, otherwise the
/// socket peer.
fn client_ip(headers: &HeaderMap, peer: SocketAddr, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|s| s.trim().parse().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    peer.ip()
}
