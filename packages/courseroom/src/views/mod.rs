mod client;
mod course;
mod index;

pub use course::course_page;
pub use index::index_page;

use chrono::{DateTime, Utc};
use live_updates::Nonce;
use maud::{DOCTYPE, Markup, PreEscaped, html};

/// Name of the meta tag carrying the page's live-updates nonce.
pub const NONCE_META: &str = "live-updates-nonce";

const STYLES: &str = r#"
body { font-family: system-ui, sans-serif; max-width: 48rem; margin: 2rem auto; padding: 0 1rem; color: #1f2933; }
header { display: flex; align-items: baseline; justify-content: space-between; border-bottom: 1px solid #d9e2ec; margin-bottom: 1.5rem; }
header a { color: inherit; text-decoration: none; }
ul.courses, ol.messages { list-style: none; padding: 0; }
ul.courses li, ol.messages li { padding: 0.5rem 0; border-bottom: 1px solid #f0f4f8; }
.meta { color: #829ab1; font-size: 0.85rem; }
.empty { color: #829ab1; font-style: italic; }
form { display: flex; gap: 0.5rem; margin-top: 1.5rem; }
form input[name=body], form input[name=name] { flex: 1; }
#live-status { font-size: 0.8rem; color: #829ab1; }
#live-status[data-state=live] { color: #2f855a; }
"#;

/// Wraps page content in the shared document shell.
///
/// Pages rendered with a nonce carry it in a meta tag and load the client
/// script, which opens the push channel and swaps the body on every push.
pub fn layout(title: &str, nonce: Option<&Nonce>, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                @if let Some(nonce) = nonce {
                    meta name=(NONCE_META) content=(nonce.as_str());
                }
                title { (title) " - Courseroom" }
                style { (PreEscaped(STYLES)) }
            }
            body {
                header {
                    h1 { a href="/" { "Courseroom" } }
                    @if nonce.is_some() {
                        span id="live-status" { "connecting" }
                    }
                }
                main { (content) }
                @if nonce.is_some() {
                    script { (PreEscaped(client::JAVASCRIPT)) }
                }
            }
        }
    }
}

pub(crate) fn timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}
