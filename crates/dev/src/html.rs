//! Bootstrap script injection into `index.html`.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

static HEAD_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<head(\s[^>]*)?>").expect("valid regex"));

const BOOTSTRAP: &str = "\n\t\t<script type=\"module\">\n\t\t\timport '/_trs.js';\n\t\t</script>";

/// Inserts the client bootstrap module as the first child of `<head>`.
///
/// Documents without a `<head>` element are returned unchanged.
pub fn inject_bootstrap(html: &str) -> Cow<'_, str> {
    match HEAD_OPEN.find(html) {
        Some(head) => {
            let mut out = String::with_capacity(html.len() + BOOTSTRAP.len());
            out.push_str(&html[..head.end()]);
            out.push_str(BOOTSTRAP);
            out.push_str(&html[head.end()..]);
            Cow::Owned(out)
        }
        None => Cow::Borrowed(html),
    }
}
