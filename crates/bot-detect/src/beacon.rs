use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Seconds since the unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Issue a beacon token bound to a session key.
///
/// Format: `issued_at:hex(hmac_sha256(secret, "session_key:issued_at"))`.
pub fn issue_token(session_key: &str, secret: &str, issued_at: u64) -> String {
    let signature = hex::encode(sign(secret, session_key, issued_at).finalize().into_bytes());
    format!("{issued_at}:{signature}")
}

/// Check a token posted back by the beacon script.
///
/// Rejects tokens signed for another session, older than `ttl_secs`, or
/// issued in the future.
pub fn verify_token(token: &str, session_key: &str, secret: &str, ttl_secs: u64, now: u64) -> bool {
    let Some((issued_at, signature)) = token.split_once(':') else {
        return false;
    };

    let issued_at: u64 = match issued_at.parse() {
        Ok(v) => v,
        Err(_) => return false,
    };
    if issued_at > now || now - issued_at > ttl_secs {
        return false;
    }

    let signature = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    sign(secret, session_key, issued_at)
        .verify_slice(&signature)
        .is_ok()
}

fn sign(secret: &str, session_key: &str, issued_at: u64) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(session_key.as_bytes());
    mac.update(b":");
    mac.update(issued_at.to_string().as_bytes());
    mac
}

/// Extract a named cookie value from a Cookie header string.
pub fn extract_cookie(cookie_header: &str, name: &str) -> Option<String> {
    cookie_header.split(';').find_map(|cookie| {
        let (key, value) = cookie.trim().split_once('=')?;
        (key == name).then(|| urldecode(value))
    })
}

/// Simple URL decode (handles %XX encoding).
fn urldecode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let decoded = s
                .get(i + 1..i + 3)
                .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = decoded {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Client script served at `/beacon.js`.
///
/// Posts the token back to prove script execution, then records timing,
/// pointer, scroll and keystroke events into bounded arrays that are flushed
/// to `/collect` periodically and when the page is hidden.
pub fn beacon_script(token: &str) -> String {
    format!(
        r#"(function() {{
  var token = "{token}";
  var MAX = 200;
  var queue = [];
  var lastKey = null;
  var lastMove = 0;

  function now() {{ return performance.now(); }}
  function push(ev) {{
    ev.timestamp_ms = now();
    if (queue.length >= MAX) queue.shift();
    queue.push(ev);
  }}
  function post(path, body) {{
    return fetch(path, {{
      method: 'POST',
      credentials: 'same-origin',
      keepalive: true,
      headers: {{ 'Content-Type': 'application/json' }},
      body: JSON.stringify(body)
    }});
  }}
  function flush() {{
    if (queue.length === 0) return;
    var events = queue;
    queue = [];
    post('/collect', {{ events: events }}).catch(function() {{}});
  }}

  post('/beacon', {{ token: token }}).catch(function() {{}});
  push({{ type: 'timing', label: 'script_load' }});

  document.addEventListener('mousemove', function(e) {{
    var t = now();
    if (t - lastMove < 16) return;
    lastMove = t;
    push({{ type: 'pointer_move', x: e.clientX, y: e.clientY }});
  }}, {{ passive: true }});
  window.addEventListener('scroll', function() {{
    push({{ type: 'scroll', offset: window.scrollY }});
  }}, {{ passive: true }});
  document.addEventListener('keydown', function() {{
    var t = now();
    if (lastKey !== null) push({{ type: 'keystroke', interval_ms: t - lastKey }});
    lastKey = t;
  }});
  document.addEventListener('submit', function() {{
    push({{ type: 'timing', label: 'submit' }});
    flush();
  }}, true);
  document.addEventListener('visibilitychange', function() {{
    if (document.visibilityState === 'hidden') flush();
  }});

  setInterval(flush, 2000);
}})();
"#
    )
}
