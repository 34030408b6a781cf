//! Login challenge page.

/// Renders the page shown to visitors who have to authenticate.
pub trait LoginPageRenderer: Send + Sync {
    fn render(&self, error: Option<&str>, redirect_url: &str) -> String;
}

/// The built-in email form, posting to the reserved login path.
#[derive(Debug, Clone, Copy, Default)]
pub struct MagicLoginPage;

impl LoginPageRenderer for MagicLoginPage {
    fn render(&self, error: Option<&str>, redirect_url: &str) -> String {
        let error_block = error
            .map(|message| format!(r#"<div class="error">{}</div>"#, escape_html(message)))
            .unwrap_or_default();

        LOGIN_HTML
            .replace("{{login_path}}", super::LOGIN_PATH)
            .replace("{{error}}", &error_block)
            .replace("{{redirect_url}}", &escape_html(redirect_url))
    }
}

/// Escape text for use in HTML content and double-quoted attributes.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const LOGIN_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Access Required</title>
    <style>
        * { box-sizing: border-box; margin: 0; padding: 0; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background-color: #f4f4f5;
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
            padding: 20px;
        }
        .container {
            background: #ffffff;
            border: 1px solid #e4e4e7;
            border-radius: 12px;
            box-shadow: 0 4px 6px -1px rgba(0, 0, 0, 0.1);
            padding: 40px;
            max-width: 420px;
            width: 100%;
        }
        h1 { font-size: 20px; font-weight: 600; color: #18181b; margin-bottom: 8px; }
        .description { color: #52525b; margin-bottom: 24px; font-size: 14px; line-height: 1.5; }
        .error {
            background: #fef2f2;
            color: #991b1b;
            border: 1px solid #fecaca;
            border-radius: 8px;
            padding: 12px 16px;
            margin-bottom: 20px;
            font-size: 14px;
        }
        label { display: block; font-size: 14px; font-weight: 500; color: #3f3f46; margin-bottom: 8px; }
        input[type="email"] {
            width: 100%;
            padding: 12px 16px;
            border: 1px solid #d4d4d8;
            border-radius: 8px;
            font-size: 15px;
        }
        button {
            width: 100%;
            margin-top: 16px;
            padding: 12px 16px;
            background: #2563eb;
            color: white;
            border: none;
            border-radius: 8px;
            font-size: 15px;
            cursor: pointer;
        }
        button:hover { background: #1d4ed8; }
        .footer { text-align: center; margin-top: 24px; padding-top: 24px; border-top: 1px solid #e4e4e7; font-size: 12px; color: #71717a; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Access Required</h1>
        <p class="description">Enter your email address to continue to this site.</p>
        {{error}}
        <form method="POST" action="{{login_path}}">
            <label for="email">Email Address</label>
            <input type="email" id="email" name="email" placeholder="you@example.com" required autofocus>
            <input type="hidden" name="redirect_url" value="{{redirect_url}}">
            <button type="submit">Continue</button>
        </form>
        <div class="footer">Protected by tun</div>
    </div>
</body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_without_error() {
        let html = MagicLoginPage.render(None, "/protected?tab=1");
        assert!(html.contains("<!DOCTYPE html>"));
        assert!(html.contains(r#"action="/__expose_magic_login""#));
        assert!(html.contains(r#"name="redirect_url" value="/protected?tab=1""#));
        assert!(!html.contains(r#"class="error""#));
    }

    #[test]
    fn test_render_escapes_input() {
        let html = MagicLoginPage.render(Some("<b>nope</b>"), r#"/x"><script>"#);
        assert!(html.contains("&lt;b&gt;nope&lt;/b&gt;"));
        assert!(html.contains("/x&quot;&gt;&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }
}
