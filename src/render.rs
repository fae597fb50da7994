/// Plain-text rendition of an HTML-only body, used as the stored text body.
///
/// Goes through the sanitizing pipeline so styles, scripts and tracking
/// pixels never reach the local store as text.
pub fn html_to_text(html: &str) -> String {
    html_safe_md::render_email_plain(None, Some(html))
}
