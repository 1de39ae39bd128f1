//! Landing page served for referral links.
//!
//! The page reads the screen size, timezone and language from the browser
//! and forwards them to `/api/process-click`, where the click is recorded.

const MAX_CODE_LEN: usize = 64;

/// Referral codes are embedded verbatim in HTML and JavaScript, so only a
/// conservative alphabet is accepted.
pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_CODE_LEN
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Render the landing page for a code that passed [`is_valid_code`].
pub fn render(code: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>Opening App...</title>
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <style>
    body {{
      font-family: -apple-system, BlinkMacSystemFont, sans-serif;
      display: flex;
      justify-content: center;
      align-items: center;
      height: 100vh;
      margin: 0;
    }}
    .container {{ text-align: center; padding: 20px; }}
  </style>
</head>
<body>
  <div class="container">
    <p>Taking you to the app...</p>
  </div>
  <script>
    (async function() {{
      const data = {{
        code: '{code}',
        sw: screen.width,
        sh: screen.height,
        tz: Intl.DateTimeFormat().resolvedOptions().timeZone,
        lang: navigator.language,
      }};

      try {{
        await navigator.clipboard.writeText(JSON.stringify({{ ref: '{code}', ts: Date.now() }}));
      }} catch (e) {{}}

      const params = new URLSearchParams(data);
      window.location.href = '/api/process-click?' + params.toString();
    }})();
  </script>
  <noscript>
    <meta http-equiv="refresh" content="0;url=/api/process-click?code={code}">
  </noscript>
</body>
</html>
"#
    )
}
