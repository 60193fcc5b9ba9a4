use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::storage::Proxy;

const PROXY_TEST_URL: &str = "https://api.openai.com/v1/models";
const PROXY_TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// `"{type}://[{user}:{pass}@]{host}:{port}"` — the socks5h scheme defers
/// DNS to the proxy; http/https tunnel via CONNECT inside reqwest.
pub fn proxy_url(proxy: &Proxy) -> String {
    let auth = match (&proxy.username, &proxy.password) {
        (Some(user), Some(pass)) => format!("{user}:{pass}@"),
        (Some(user), None) => format!("{user}@"),
        _ => String::new(),
    };
    format!(
        "{}://{auth}{}:{}",
        proxy.proxy_type.as_str(),
        proxy.host,
        proxy.port
    )
}

fn build_proxied_client(proxy: &Proxy) -> anyhow::Result<reqwest::Client> {
    let url = proxy_url(proxy);
    let p = reqwest::Proxy::all(&url)
        .map_err(|e| anyhow::anyhow!("代理 URL 无效（{url}）：{e}"))?;
    reqwest::Client::builder()
        .proxy(p)
        .build()
        .map_err(Into::into)
}

struct CachedClient {
    updated_at_ms: i64,
    client: reqwest::Client,
}

/// One reqwest client per proxy, cached to keep connection pools warm.
/// Entries are keyed on the proxy's `updated_at_ms`, so an edited proxy gets
/// a fresh client on next use and a deleted proxy simply stops resolving.
pub struct ClientPool {
    default: reqwest::Client,
    by_proxy: Mutex<HashMap<String, CachedClient>>,
}

impl ClientPool {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            default: reqwest::Client::builder().build()?,
            by_proxy: Mutex::new(HashMap::new()),
        })
    }

    pub fn default_client(&self) -> reqwest::Client {
        self.default.clone()
    }

    /// Disabled or absent proxies fall back to the process default dialer.
    pub fn client_for(&self, proxy: Option<&Proxy>) -> anyhow::Result<reqwest::Client> {
        let Some(proxy) = proxy.filter(|p| p.enabled) else {
            return Ok(self.default.clone());
        };

        let mut cache = self
            .by_proxy
            .lock()
            .map_err(|_| anyhow::anyhow!("client pool 锁已中毒"))?;
        if let Some(cached) = cache.get(&proxy.id)
            && cached.updated_at_ms == proxy.updated_at_ms
        {
            return Ok(cached.client.clone());
        }

        let client = build_proxied_client(proxy)?;
        cache.insert(
            proxy.id.clone(),
            CachedClient {
                updated_at_ms: proxy.updated_at_ms,
                client: client.clone(),
            },
        );
        Ok(client)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxyTestResult {
    pub ok: bool,
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// HEAD request against the openai models endpoint through the proxy, with
/// a 10 s overall budget.
pub async fn test_proxy(proxy: &Proxy) -> ProxyTestResult {
    let client = match build_proxied_client(proxy) {
        Ok(c) => c,
        Err(e) => {
            return ProxyTestResult {
                ok: false,
                status: None,
                latency_ms: 0,
                error: Some(e.to_string()),
            };
        }
    };

    let started = Instant::now();
    let resp = tokio::time::timeout(PROXY_TEST_TIMEOUT, client.head(PROXY_TEST_URL).send()).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match resp {
        Ok(Ok(r)) => ProxyTestResult {
            ok: true,
            status: Some(r.status().as_u16()),
            latency_ms,
            error: None,
        },
        Ok(Err(e)) => ProxyTestResult {
            ok: false,
            status: None,
            latency_ms,
            error: Some(e.to_string()),
        },
        Err(_) => ProxyTestResult {
            ok: false,
            status: None,
            latency_ms,
            error: Some("timeout".to_string()),
        },
    }
}
