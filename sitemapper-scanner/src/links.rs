use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Extract the distinct same-subdomain outbound links of a page.
///
/// Every `href` is resolved against `base` (the page's final URL, after
/// redirects). Fragments are dropped. A link is kept when it contains
/// `subdomain` and is neither `page_url` nor `base`. First-seen order is kept.
pub fn extract_links(html: &str, base: &Url, page_url: &str, subdomain: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let link_selector = Selector::parse("a[href]").unwrap();

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&link_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };

        let Some(link) = resolve_href(base, href) else {
            debug!("Unresolvable href {:?} on {}", href, page_url);
            continue;
        };

        if !link.contains(subdomain) || link == page_url || link == base.as_str() {
            continue;
        }

        if seen.insert(link.clone()) {
            links.push(link);
        }
    }

    links
}

/// Resolve an href against the page URL, dropping any fragment.
pub fn resolve_href(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    let mut resolved = base.join(href).ok()?;
    resolved.set_fragment(None);
    Some(resolved.to_string())
}

/// `scheme://host[:port]` of a URL; the fixed scope of a crawl job.
pub fn subdomain_of(url: &Url) -> Option<String> {
    url.host_str()?;
    Some(url.origin().ascii_serialization())
}
