use serde::Serialize;

/// Classification of a request's User-Agent header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAgentClass {
    /// Browser-like or otherwise unremarkable.
    Normal,
    /// Matches a known automation client or crawler signature.
    KnownBot,
    /// Header absent, empty, or not valid text.
    Missing,
}

/// Automation clients and headless drivers.
const AUTOMATION_CLIENTS: &[&str] = &[
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "aiohttp",
    "scrapy",
    "httpclient",
    "go-http-client",
    "java/",
    "okhttp",
    "libwww-perl",
    "mechanize",
    "phantomjs",
    "headlesschrome",
    "selenium",
    "puppeteer",
    "playwright",
];

/// Generic crawler tokens; only counted when the UA does not look like a
/// browser.
const CRAWLER_TOKENS: &[&str] = &["bot", "crawler", "spider", "scraper", "fetch", "scan"];

/// Classify a User-Agent value. `None` stands for an absent or undecodable
/// header. A match against `allowlist` (case-insensitive substring) is
/// always `Normal`.
pub fn classify_user_agent(ua: Option<&str>, allowlist: &[String]) -> UserAgentClass {
    let ua = match ua.map(str::trim) {
        Some(ua) if !ua.is_empty() => ua,
        _ => return UserAgentClass::Missing,
    };

    let ua_lower = ua.to_lowercase();

    if allowlist
        .iter()
        .any(|allowed| ua_lower.contains(&allowed.to_lowercase()))
    {
        return UserAgentClass::Normal;
    }

    if AUTOMATION_CLIENTS.iter().any(|p| ua_lower.contains(p)) {
        return UserAgentClass::KnownBot;
    }

    let looks_like_browser = ua_lower.contains("mozilla")
        && ["chrome", "firefox", "safari", "edg"]
            .iter()
            .any(|engine| ua_lower.contains(engine));

    // "compatible; Googlebot" UAs start with Mozilla but carry no engine.
    if !looks_like_browser && CRAWLER_TOKENS.iter().any(|p| ua_lower.contains(p)) {
        return UserAgentClass::KnownBot;
    }

    UserAgentClass::Normal
}
