use reqwest::Url;

/// Origin every navigation and relative link resolves against.
pub const ORIGIN: &str = "https://m.facebook.com";

/// Cookies are always scoped here so they are visible on every subdomain we navigate.
pub const COOKIE_DOMAIN: &str = ".facebook.com";

pub const HOME_URL: &str = "https://m.facebook.com/";

const SEARCH_POSTS_URL: &str = "https://m.facebook.com/search/posts/";

/// Search results URL for a query (`/search/posts/?q=...`).
pub fn search_url(query: &str) -> String {
    match Url::parse(SEARCH_POSTS_URL) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("q", query);
            url.to_string()
        }
        Err(_) => format!("{}?q={}", SEARCH_POSTS_URL, urlencoding::encode(query)),
    }
}

/// Resolve an href against `base`, returning `None` for anything unparseable.
pub fn absolutize(href: &str, base: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let base = Url::parse(base).or_else(|_| Url::parse(ORIGIN)).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}
