pub mod error;

pub use error::{BrowserlessError, Result};

use std::time::Duration;

use serde::Serialize;

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct FunctionRequest<'a> {
    code: &'a str,
    context: &'a serde_json::Value,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}/{}", self.base_url, path);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }

    /// Run a Puppeteer function via Browserless /function endpoint.
    ///
    /// `code` is an ES module exporting a default `async ({ page, context })`
    /// function; `context` is passed through verbatim. Returns whatever JSON
    /// the function resolved with.
    pub async fn function(
        &self,
        code: &str,
        context: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.run_function(code, context, None).await
    }

    /// Like [`function`](Self::function), for scripts that need longer than the
    /// client-wide timeout. `timeout` bounds both the HTTP request and the
    /// browser session on the Browserless side.
    pub async fn function_with_timeout(
        &self,
        code: &str,
        context: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        self.run_function(code, context, Some(timeout)).await
    }

    async fn run_function(
        &self,
        code: &str,
        context: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        tracing::debug!(
            base_url = %self.base_url,
            timeout_ms = timeout.map(|t| t.as_millis() as u64),
            "browserless: running function"
        );

        let mut request = self
            .client
            .post(self.endpoint("function"))
            .json(&FunctionRequest { code, context });
        if let Some(timeout) = timeout {
            request = request
                .timeout(timeout)
                .query(&[("timeout", timeout.as_millis() as u64)]);
        }

        let resp = request.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| BrowserlessError::Decode(e.to_string()))
    }
}
