//! Browserless-backed page driver for the bookmarks timeline.
//!
//! The /function endpoint is stateless: every call opens a fresh page. The
//! driver tracks scroll depth locally and each read replays that many scrolls
//! before collecting the rendered cards, so a read's time budget grows by one
//! settle interval per scroll.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use bookmark_common::{AppConfig, OpError, RawItem};
use browserless_client::{BrowserlessClient, BrowserlessError};

use crate::traits::{PageSource, SessionProbe};

const HARVEST_FN: &str = r#"
export default async function ({ page, context }) {
  const { url, cookies, scrolls, settleMs, mode } = context;
  await page.setCookie(...cookies);
  await page.goto(url, { waitUntil: "networkidle2" });

  const current = page.url();
  const loggedIn = !current.includes("/login") && !current.includes("/i/flow");
  if (mode === "session" || !loggedIn) {
    return { data: { loggedIn, items: [] }, type: "application/json" };
  }

  const CARD = 'article[data-testid="tweet"]';
  await page.waitForSelector(CARD, { timeout: settleMs * 4 }).catch(() => {});
  for (let i = 0; i < scrolls; i++) {
    await page.evaluate(() => window.scrollBy(0, window.innerHeight * 2));
    await new Promise((r) => setTimeout(r, settleMs));
  }

  const items = await page.$$eval(CARD, (cards) =>
    cards.map((card) => {
      const link = card.querySelector('a[href*="/status/"]');
      const time = card.querySelector("time");
      const text = card.querySelector('[data-testid="tweetText"]');
      const user = card.querySelector('[data-testid="User-Name"]');
      const lines = (user?.innerText ?? "").split("\n");
      const count = (id) =>
        card.querySelector(`[data-testid="${id}"]`)?.innerText?.trim() || "0";
      return {
        url: link?.getAttribute("href") ?? null,
        text: text?.innerText ?? "",
        author: {
          name: lines[0] ?? null,
          handle: lines.find((l) => l.startsWith("@")) ?? "",
        },
        createdAt: time?.getAttribute("datetime") ?? null,
        metrics: {
          replies: count("reply"),
          retweets: count("retweet"),
          likes: count("like"),
        },
        hasMedia: !!card.querySelector('[data-testid="tweetPhoto"], video'),
      };
    })
  );
  return { data: { loggedIn, items }, type: "application/json" };
}
"#;

#[derive(Debug, Clone, Serialize)]
struct Cookie {
    name: String,
    value: String,
    domain: String,
    path: &'static str,
    secure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Mode {
    Session,
    Harvest,
}

pub struct BrowserlessPage {
    client: BrowserlessClient,
    bookmarks_url: String,
    cookies: Vec<Cookie>,
    timeout: Duration,
    settle: Duration,
    depth: AtomicU32,
}

impl BrowserlessPage {
    pub fn new(config: &AppConfig, timeout: Duration, settle: Duration) -> Result<Self> {
        let client = BrowserlessClient::new(
            &config.browserless_url,
            config.browserless_token.as_deref(),
            timeout,
        )
        .context("failed to build browserless client")?;
        let cookies = parse_cookies(&config.session_cookie, &config.bookmarks_url)?;
        info!(
            url = config.bookmarks_url.as_str(),
            cookies = cookies.len(),
            "Browserless page driver ready"
        );

        Ok(Self {
            client,
            bookmarks_url: config.bookmarks_url.clone(),
            cookies,
            timeout,
            settle,
            depth: AtomicU32::new(0),
        })
    }

    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::SeqCst)
    }

    fn context(&self, mode: Mode, scrolls: u32) -> Value {
        serde_json::json!({
            "url": self.bookmarks_url,
            "cookies": self.cookies,
            "scrolls": scrolls,
            "settleMs": self.settle.as_millis() as u64,
            "mode": mode,
        })
    }
}

/// Time budget for a read that replays `depth` scrolls on top of the
/// navigation covered by `base`.
pub fn replay_timeout(base: Duration, settle: Duration, depth: u32) -> Duration {
    base.saturating_add(settle.saturating_mul(depth))
}

#[async_trait]
impl PageSource for BrowserlessPage {
    async fn visible_items(&self) -> Result<Vec<RawItem>, OpError> {
        let depth = self.depth();
        // Same budget the session grants this attempt via `read_timeout`.
        let timeout = replay_timeout(self.timeout, self.settle, depth);
        let payload = self
            .client
            .function_with_timeout(HARVEST_FN, &self.context(Mode::Harvest, depth), timeout)
            .await
            .map_err(op_error)?;
        let items = parse_items(payload)?;
        debug!(depth, items = items.len(), "Read visible cards");
        Ok(items)
    }

    async fn scroll_or_advance(&self) -> Result<(), OpError> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(depth, "Advanced scroll depth");
        Ok(())
    }

    fn read_timeout(&self, base: Duration) -> Duration {
        replay_timeout(base, self.settle, self.depth())
    }
}

#[async_trait]
impl SessionProbe for BrowserlessPage {
    async fn is_authenticated(&self) -> Result<bool, OpError> {
        let payload = self
            .client
            .function(HARVEST_FN, &self.context(Mode::Session, 0))
            .await
            .map_err(op_error)?;
        payload
            .get("loggedIn")
            .and_then(Value::as_bool)
            .ok_or_else(|| OpError::MalformedPage("session response has no loggedIn flag".into()))
    }
}

/// `SESSION_COOKIE` is a raw `name=value; name2=value2` header. A bare value
/// is taken as the `auth_token` cookie.
fn parse_cookies(raw: &str, bookmarks_url: &str) -> Result<Vec<Cookie>> {
    let url = url::Url::parse(bookmarks_url)
        .with_context(|| format!("BOOKMARKS_URL is not a valid URL: {bookmarks_url}"))?;
    let host = url
        .host_str()
        .with_context(|| format!("BOOKMARKS_URL has no host: {bookmarks_url}"))?;
    let domain = format!(".{}", host.trim_start_matches("www."));
    let secure = url.scheme() == "https";

    let cookie = |name: &str, value: &str| Cookie {
        name: name.trim().to_string(),
        value: value.trim().to_string(),
        domain: domain.clone(),
        path: "/",
        secure,
    };

    let raw = raw.trim();
    if !raw.contains('=') {
        return Ok(vec![cookie("auth_token", raw)]);
    }
    Ok(raw
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(name, _)| !name.trim().is_empty())
        .map(|(name, value)| cookie(name, value))
        .collect())
}

fn parse_items(payload: Value) -> Result<Vec<RawItem>, OpError> {
    if payload.get("loggedIn").and_then(Value::as_bool) == Some(false) {
        return Err(OpError::AuthenticationRequired);
    }
    match payload.get("items") {
        Some(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect()),
        _ => Err(OpError::MalformedPage(
            "function response has no items array".into(),
        )),
    }
}

fn op_error(err: BrowserlessError) -> OpError {
    if let BrowserlessError::Api { message, .. } = &err {
        if message.to_lowercase().contains("detached") {
            return OpError::Detached(message.clone());
        }
    }
    match err {
        BrowserlessError::Api { status: 401 | 403, .. } => OpError::AuthenticationRequired,
        BrowserlessError::Api { status: 408, message } => OpError::Timeout(message),
        BrowserlessError::Api { status, message } if status == 429 || status >= 500 => {
            OpError::Network(format!("status {status}: {message}"))
        }
        BrowserlessError::Api { status, message } => {
            OpError::MalformedPage(format!("status {status}: {message}"))
        }
        BrowserlessError::Timeout(msg) => OpError::Timeout(msg),
        BrowserlessError::Network(msg) => OpError::Network(msg),
        BrowserlessError::Decode(msg) => OpError::MalformedPage(msg),
    }
}
