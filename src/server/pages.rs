//! HTML shown to the browser at the end of a login

use crate::error::DeniedReason;

/// Escape text for inclusion in HTML
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Login denial page carrying the specific reason
pub fn denial_page(reason: DeniedReason) -> String {
    message_page(reason.kind(), reason.user_message())
}

/// Denial page for failures that happen before a flow exists
pub fn message_page(kind: &str, message: &str) -> String {
    let kind = escape(kind);
    let message = escape(message);
    format!(r#"<!DOCTYPE html>
<html>
<head>
    <title>Sign-in denied</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #1f2430;
            color: #f0f0f0;
        }}
        .container {{
            text-align: center;
            padding: 2rem;
            background: rgba(255,255,255,0.06);
            border-radius: 12px;
            max-width: 420px;
        }}
        h1 {{ margin: 0 0 0.75rem 0; font-size: 1.4rem; }}
        p {{ margin: 0; opacity: 0.9; }}
        .reason {{ font-family: monospace; margin-top: 1rem; opacity: 0.6; }}
        a {{ color: #8ab4f8; display: inline-block; margin-top: 1.5rem; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Sign-in denied</h1>
        <p>{message}</p>
        <p class="reason">{kind}</p>
        <a href="/">Back to sign-in</a>
    </div>
</body>
</html>"#)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_names_the_reason() {
        let page = denial_page(DeniedReason::NotAllowed);
        assert!(page.contains("forbidden"));
        assert!(page.contains(DeniedReason::NotAllowed.user_message()));
    }

    #[test]
    fn text_is_escaped() {
        let page = message_page("x", "<script>alert(1)</script>");
        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;"));
    }
}
