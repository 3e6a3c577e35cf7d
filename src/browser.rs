//! Browser automation behind two small traits so the harvest loop can run against a fake.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use headless_chrome::browser::tab::RequestPausedDecision;
use headless_chrome::browser::transport::{SessionId, Transport};
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::{FailRequest, RequestPattern, RequestStage};
use headless_chrome::protocol::cdp::Network::{self, CookieParam, ErrorReason, ResourceType};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::json;
use tracing::{debug, info};

use crate::cookies::{CookieScope, NormalizedCookie, VisibleCookie};
use crate::session::Session;

/// Mobile viewport, matching the mobile user agents we present.
const VIEWPORT: (u32, u32) = (390, 844);
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

// Device & environment fingerprint patches, applied before any page script runs.
const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'hardwareConcurrency', { get: () => 4 });
    Object.defineProperty(navigator, 'maxTouchPoints', { get: () => 5 });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });

    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function(parameter) {
        if (parameter === 37445) return 'Qualcomm';
        if (parameter === 37446) return 'Adreno (TM) 640';
        return getParameter.apply(this, [parameter]);
    };
    window.chrome = { runtime: {}, loadTimes: function() {}, csi: function() {}, app: {} };

    ['RTCPeerConnection', 'webkitRTCPeerConnection'].forEach(className => {
        if (window[className]) window[className] = undefined;
    });
"#;

/// One live page. Every method is a single interaction; pacing is up to the caller.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Go to `url`, wait for the load, and return where we ended up.
    async fn navigate(&self, url: &str) -> Result<String>;
    async fn current_url(&self) -> Result<String>;
    async fn html(&self) -> Result<String>;
    async fn add_cookies(&self, cookies: &[NormalizedCookie]) -> Result<()>;
    /// Cookies the browser would send to `url`.
    async fn visible_cookies(&self, url: &str) -> Result<Vec<VisibleCookie>>;
    async fn scroll_to_bottom(&self) -> Result<()>;
    /// Click the first button or link whose text matches `pattern` (case-insensitive).
    async fn activate_first_matching(&self, pattern: &str) -> Result<bool>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    type Page: PageDriver;

    async fn launch(&self, session: &Session) -> Result<Self::Page>;
}

pub struct ChromeLauncher {
    pub headless: bool,
}

pub struct ChromePage {
    // Dropping the browser kills the Chrome process.
    _browser: Browser,
    tab: Arc<Tab>,
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    type Page = ChromePage;

    async fn launch(&self, session: &Session) -> Result<ChromePage> {
        let mut args = vec![
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--lang=en-US"),
        ];
        let ua_arg = format!("--user-agent={}", session.user_agent);
        args.push(OsStr::new(&ua_arg));

        let proxy_arg: String;
        if let Some(proxy) = &session.proxy {
            proxy_arg = format!("--proxy-server={}", proxy.server);
            args.push(OsStr::new(&proxy_arg));
            info!(session = %session.id, proxy = %proxy.server, "🔄 Using proxy");
        }

        let browser = Browser::new(LaunchOptions {
            headless: self.headless,
            window_size: Some(VIEWPORT),
            idle_browser_timeout: Duration::from_secs(300),
            args,
            ..Default::default()
        })
        .map_err(|e| anyhow!("launching Chrome: {e}"))?;

        let tab = browser.new_tab().map_err(|e| anyhow!("opening tab: {e}"))?;
        tab.set_default_timeout(NAVIGATION_TIMEOUT);
        tab.set_user_agent(&session.user_agent, Some("en-US,en;q=0.9"), None)
            .map_err(|e| anyhow!("setting user agent: {e}"))?;
        tab.set_extra_http_headers(HashMap::from([("Accept-Language", "en-US,en;q=0.9")]))
            .map_err(|e| anyhow!("setting headers: {e}"))?;

        tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
            source: STEALTH_SCRIPT.to_string(),
            world_name: None,
            include_command_line_api: None,
            run_immediately: None,
        })
        .map_err(|e| anyhow!("installing stealth script: {e}"))?;

        block_heavy_resources(&tab, session)?;

        debug!(session = %session.id, "Browser ready");
        Ok(ChromePage {
            _browser: browser,
            tab,
        })
    }
}

/// Fail image, media and font requests at the client, and answer proxy auth challenges.
fn block_heavy_resources(tab: &Arc<Tab>, session: &Session) -> Result<()> {
    let patterns = [RequestPattern {
        url_pattern: Some("*".to_string()),
        resource_Type: None,
        request_stage: Some(RequestStage::Request),
    }];
    let needs_auth = session.proxy.as_ref().map_or(false, |p| p.requires_auth());

    tab.enable_fetch(Some(&patterns), Some(needs_auth))
        .map_err(|e| anyhow!("enabling request interception: {e}"))?;
    tab.enable_request_interception(Arc::new(
        |_transport: Arc<Transport>, _session: SessionId, event: RequestPausedEvent| {
            match event.params.resource_Type {
                ResourceType::Image | ResourceType::Media | ResourceType::Font => {
                    RequestPausedDecision::Fail(FailRequest {
                        request_id: event.params.request_id,
                        error_reason: ErrorReason::BlockedByClient,
                    })
                }
                _ => RequestPausedDecision::Continue(None),
            }
        },
    ))
    .map_err(|e| anyhow!("installing request interceptor: {e}"))?;

    if let Some(proxy) = session.proxy.as_ref().filter(|p| p.requires_auth()) {
        tab.authenticate(proxy.username.clone(), proxy.password.clone())
            .map_err(|e| anyhow!("registering proxy credentials: {e}"))?;
        info!(session = %session.id, "🔐 Proxy credentials registered");
    }
    Ok(())
}

fn cookie_param(cookie: &NormalizedCookie) -> Result<CookieParam> {
    let mut value = json!({
        "name": cookie.name,
        "value": cookie.value,
        "path": cookie.path,
        "httpOnly": cookie.http_only,
        "secure": cookie.secure,
        "sameSite": cookie.same_site.as_str(),
    });
    match &cookie.scope {
        CookieScope::Domain(domain) => value["domain"] = json!(domain),
        CookieScope::Url(url) => value["url"] = json!(url),
    }
    if let Some(expires) = cookie.expires {
        value["expires"] = json!(expires as f64);
    }
    serde_json::from_value(value).with_context(|| format!("cookie `{}`", cookie.name))
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn navigate(&self, url: &str) -> Result<String> {
        self.tab
            .navigate_to(url)
            .map_err(|e| anyhow!("navigating to {url}: {e}"))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| anyhow!("waiting for {url}: {e}"))?;
        Ok(self.tab.get_url())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.tab.get_url())
    }

    async fn html(&self) -> Result<String> {
        self.tab
            .get_content()
            .map_err(|e| anyhow!("reading page content: {e}"))
    }

    async fn add_cookies(&self, cookies: &[NormalizedCookie]) -> Result<()> {
        let params = cookies.iter().map(cookie_param).collect::<Result<Vec<_>>>()?;
        self.tab
            .set_cookies(params)
            .map_err(|e| anyhow!("setting cookies: {e}"))
    }

    async fn visible_cookies(&self, url: &str) -> Result<Vec<VisibleCookie>> {
        let found = self
            .tab
            .call_method(Network::GetCookies {
                urls: Some(vec![url.to_string()]),
            })
            .map_err(|e| anyhow!("reading cookies for {url}: {e}"))?;
        Ok(found
            .cookies
            .into_iter()
            .map(|c| VisibleCookie {
                name: c.name,
                value: c.value,
            })
            .collect())
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.tab
            .evaluate("window.scrollTo(0, document.body.scrollHeight);", false)
            .map_err(|e| anyhow!("scrolling: {e}"))?;
        Ok(())
    }

    async fn activate_first_matching(&self, pattern: &str) -> Result<bool> {
        let script = format!(
            r#"(() => {{
                const re = new RegExp({pattern}, 'i');
                const el = Array.from(document.querySelectorAll('a, button, [role="button"]'))
                    .find(e => re.test((e.innerText || '').trim()));
                if (!el) return false;
                el.click();
                return true;
            }})()"#,
            pattern = serde_json::to_string(pattern)?
        );
        let result = self
            .tab
            .evaluate(&script, false)
            .map_err(|e| anyhow!("looking for a load-more control: {e}"))?;
        Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::SameSite;

    #[test]
    fn cookie_params_carry_scope_and_flags() {
        let cookie = NormalizedCookie {
            name: "xs".into(),
            value: "abc".into(),
            scope: CookieScope::Domain(".facebook.com".into()),
            path: "/".into(),
            expires: Some(1_900_000_000),
            http_only: true,
            secure: true,
            same_site: SameSite::None,
        };
        let param = cookie_param(&cookie).unwrap();
        assert_eq!(param.name, "xs");
        assert_eq!(param.domain.as_deref(), Some(".facebook.com"));
        assert_eq!(param.url, None);
        assert_eq!(param.secure, Some(true));
        assert_eq!(param.http_only, Some(true));
        assert_eq!(param.same_site, Some(Network::CookieSameSite::None));
        assert_eq!(param.expires, Some(1_900_000_000.0));
    }

    #[test]
    fn url_scoped_cookie_has_no_domain() {
        let cookie = NormalizedCookie {
            name: "c_user".into(),
            value: "1".into(),
            scope: CookieScope::Url("https://m.facebook.com/".into()),
            path: "/".into(),
            expires: None,
            http_only: false,
            secure: true,
            same_site: SameSite::Lax,
        };
        let param = cookie_param(&cookie).unwrap();
        assert_eq!(param.url.as_deref(), Some("https://m.facebook.com/"));
        assert_eq!(param.domain, None);
        assert_eq!(param.expires, None);
    }
}
