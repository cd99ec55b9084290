//! HTML template composition.
//!
//! The client build emits an `index.html` with three outlets:
//!
//! ```html
//! <head>
//!   <meta name="google-site-verification" content="%GOOGLE_SITE_VERIFICATION%" />
//!   <!--app-head-->
//! </head>
//! <body>
//!   <div id="root"><!--app-html--></div>
//!   <script>window.__INITIAL_DATA__ = undefined</script>
//! </body>
//! ```
//!
//! [`Template::parse`] checks each outlet occurs exactly once and splits the
//! document around them; [`Template::render`] fills the outlets.

use serde_json::Value;
use thiserror::Error;

pub const HEAD_OUTLET: &str = "<!--app-head-->";
pub const BODY_OUTLET: &str = "<!--app-html-->";
/// Global binding the client bootstrapper reads on load.
pub const INITIAL_DATA_GLOBAL: &str = "window.__INITIAL_DATA__";
pub const INITIAL_DATA_PLACEHOLDER: &str = "window.__INITIAL_DATA__ = undefined";
pub const SITE_VERIFICATION_PLACEHOLDER: &str = "%GOOGLE_SITE_VERIFICATION%";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template must contain exactly one `{marker}`, found {count}")]
    Marker { marker: &'static str, count: usize },
    #[error("failed to serialize initial data: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outlet {
    Head,
    Body,
    InitialData,
}

impl Outlet {
    const ALL: [Outlet; 3] = [Outlet::Head, Outlet::Body, Outlet::InitialData];

    fn marker(self) -> &'static str {
        match self {
            Outlet::Head => HEAD_OUTLET,
            Outlet::Body => BODY_OUTLET,
            Outlet::InitialData => INITIAL_DATA_PLACEHOLDER,
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Text(String),
    Outlet(Outlet),
}

/// Values for the three outlets. Missing fragments render as empty strings;
/// missing initial data leaves the `undefined` assignment in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct Slots<'a> {
    pub head: Option<&'a str>,
    pub body: Option<&'a str>,
    pub initial_data: Option<&'a Value>,
}

/// A parsed document template.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(html: &str) -> Result<Self, TemplateError> {
        let mut outlets = Vec::with_capacity(Outlet::ALL.len());
        for outlet in Outlet::ALL {
            let marker = outlet.marker();
            let positions: Vec<usize> = html.match_indices(marker).map(|(at, _)| at).collect();
            match positions.as_slice() {
                [at] => outlets.push((*at, outlet)),
                _ => {
                    return Err(TemplateError::Marker {
                        marker,
                        count: positions.len(),
                    })
                }
            }
        }
        outlets.sort_by_key(|(at, _)| *at);

        let mut segments = Vec::with_capacity(outlets.len() * 2 + 1);
        let mut cursor = 0;
        for (at, outlet) in outlets {
            if at > cursor {
                segments.push(Segment::Text(html[cursor..at].to_string()));
            }
            segments.push(Segment::Outlet(outlet));
            cursor = at + outlet.marker().len();
        }
        if cursor < html.len() {
            segments.push(Segment::Text(html[cursor..].to_string()));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, slots: &Slots<'_>) -> Result<String, TemplateError> {
        let data = slots.initial_data.map(serialize_initial_data).transpose()?;

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Outlet(Outlet::Head) => out.push_str(slots.head.unwrap_or_default()),
                Segment::Outlet(Outlet::Body) => out.push_str(slots.body.unwrap_or_default()),
                Segment::Outlet(Outlet::InitialData) => match &data {
                    Some(json) => {
                        out.push_str(INITIAL_DATA_GLOBAL);
                        out.push_str(" = ");
                        out.push_str(json);
                    }
                    None => out.push_str(INITIAL_DATA_PLACEHOLDER),
                },
            }
        }
        Ok(out)
    }
}

/// Fill `template` with rendered fragments and initial data.
pub fn compose(
    template: &Template,
    head_html: &str,
    app_html: &str,
    initial_data: &Value,
) -> Result<String, TemplateError> {
    template.render(&Slots {
        head: Some(head_html),
        body: Some(app_html),
        initial_data: Some(initial_data),
    })
}

/// Serialize `value` for embedding inside a `<script>` element.
///
/// Every `<` becomes `\u003c`, so no part of the payload can close the script
/// element or open a tag. U+2028 and U+2029 are escaped too; older engines
/// treat them as line terminators inside string literals.
pub fn serialize_initial_data(value: &Value) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut out = String::with_capacity(json.len());
    for ch in json.chars() {
        match ch {
            '<' => out.push_str("\\u003c"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Substitute the site-verification token, or drop the `<meta>` tag that
/// carries the placeholder when no token is configured.
pub fn apply_site_verification(html: &str, token: Option<&str>) -> String {
    match token {
        Some(token) => html.replace(SITE_VERIFICATION_PLACEHOLDER, &escape_attr(token)),
        None => {
            let mut html = html.to_string();
            while let Some(at) = html.find(SITE_VERIFICATION_PLACEHOLDER) {
                let range = enclosing_tag(&html, at)
                    .unwrap_or(at..at + SITE_VERIFICATION_PLACEHOLDER.len());
                html.replace_range(range, "");
            }
            html
        }
    }
}

/// Byte range of the `<meta ...>` tag around `at`, widened to the whole line
/// when the tag is the only thing on it.
fn enclosing_tag(html: &str, at: usize) -> Option<std::ops::Range<usize>> {
    let start = html[..at].rfind("<meta")?;
    if html[start..at].contains('>') {
        return None;
    }
    let end = at + html[at..].find('>')? + 1;

    let line_start = html[..start].rfind('\n').map_or(0, |nl| nl + 1);
    let line_end = html[end..].find('\n').map(|nl| end + nl + 1);
    match line_end {
        Some(line_end)
            if html[line_start..start].trim().is_empty()
                && html[end..line_end].trim().is_empty() =>
        {
            Some(line_start..line_end)
        }
        _ => Some(start..end),
    }
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const INDEX_HTML: &str = "<!doctype html>\n<html lang=\"id\">\n  <head>\n    <meta name=\"google-site-verification\" content=\"%GOOGLE_SITE_VERIFICATION%\" />\n    <!--app-head-->\n  </head>\n  <body>\n    <div id=\"root\"><!--app-html--></div>\n    <script>window.__INITIAL_DATA__ = undefined</script>\n  </body>\n</html>\n";

    fn template() -> Template {
        Template::parse(INDEX_HTML).unwrap()
    }

    #[test]
    fn compose_fills_every_outlet() {
        let html = compose(
            &template(),
            "<title>Berita</title>",
            "<main>Headline</main>",
            &json!({"page": 1}),
        )
        .unwrap();

        assert!(html.contains("<title>Berita</title>\n  </head>"));
        assert!(html.contains("<div id=\"root\"><main>Headline</main></div>"));
        assert!(html.contains("<script>window.__INITIAL_DATA__ = {\"page\":1}</script>"));
        assert!(!html.contains(HEAD_OUTLET));
        assert!(!html.contains(BODY_OUTLET));
        assert!(!html.contains("undefined"));
    }

    #[test]
    fn empty_slots_produce_bare_shell() {
        let html = template().render(&Slots::default()).unwrap();

        assert!(html.contains("<div id=\"root\"></div>"));
        assert!(html.contains(INITIAL_DATA_PLACEHOLDER));
        assert!(!html.contains(HEAD_OUTLET));
        assert!(!html.contains(BODY_OUTLET));
    }

    #[test]
    fn script_close_in_payload_is_escaped() {
        let data = json!({"title": "</script><script>alert(1)</script>"});
        let html = compose(&template(), "", "", &data).unwrap();

        assert_eq!(html.matches("</script>").count(), 1);
        assert!(html.contains("\\u003c/script>\\u003cscript>alert(1)\\u003c/script>"));
    }

    #[test]
    fn serialized_payload_round_trips() {
        let data = json!({"body": "a < b\u{2028}c", "tags": ["<b>", "&amp;"]});
        let json = serialize_initial_data(&data).unwrap();

        assert!(!json.contains('<'));
        assert!(!json.contains('\u{2028}'));
        assert_eq!(serde_json::from_str::<Value>(&json).unwrap(), data);
    }

    #[test]
    fn outlets_in_any_order() {
        let tpl = Template::parse(
            "<script>window.__INITIAL_DATA__ = undefined</script><!--app-html--><!--app-head-->",
        )
        .unwrap();
        let html = tpl
            .render(&Slots {
                head: Some("H"),
                body: Some("B"),
                initial_data: Some(&json!(null)),
            })
            .unwrap();
        assert_eq!(html, "<script>window.__INITIAL_DATA__ = null</script>BH");
    }

    #[test]
    fn rejects_missing_or_duplicate_outlets() {
        let err = Template::parse("<!--app-head--><!--app-html-->").unwrap_err();
        assert!(matches!(
            err,
            TemplateError::Marker { marker: INITIAL_DATA_PLACEHOLDER, count: 0 }
        ));

        let err = Template::parse(
            "<!--app-head--><!--app-html--><!--app-html--><script>window.__INITIAL_DATA__ = undefined</script>",
        )
        .unwrap_err();
        assert!(matches!(err, TemplateError::Marker { marker: BODY_OUTLET, count: 2 }));
    }

    #[test]
    fn site_verification_token_is_substituted() {
        let html = apply_site_verification(INDEX_HTML, Some("abc\"123"));
        assert!(html.contains("content=\"abc&quot;123\""));
        assert!(!html.contains(SITE_VERIFICATION_PLACEHOLDER));
    }

    #[test]
    fn site_verification_tag_is_removed_without_token() {
        let html = apply_site_verification(INDEX_HTML, None);
        assert!(!html.contains("google-site-verification"));
        assert!(html.contains("<head>\n    <!--app-head-->"));
        // the rest of the template is still a valid template
        assert!(Template::parse(&html).is_ok());
    }

    #[test]
    fn site_verification_inline_tag_removed() {
        let html = apply_site_verification(
            "<head><meta name=\"x\" content=\"%GOOGLE_SITE_VERIFICATION%\"><title>t</title></head>",
            None,
        );
        assert_eq!(html, "<head><title>t</title></head>");
    }
}
