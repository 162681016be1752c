//! Tile factories. The grid engine treats a source as an opaque capability
//! producing tile payloads; it never interprets the bytes.

use crate::layers::grid::types::TileCoord;
use crate::Result;
use async_trait::async_trait;

/// Caller-supplied tile factory. `load` receives the wrapped coordinate the
/// cache keys on and resolves with payload bytes or an error; an error never
/// aborts the rest of a batch.
#[async_trait]
pub trait TileSource: Send + Sync {
    async fn load(&self, coords: TileCoord) -> Result<Vec<u8>>;

    /// Attribution string for hosts that display one.
    fn attribution(&self) -> Option<&str> {
        None
    }
}

/// Shared async HTTP client tuned for tile fetching.
#[cfg(feature = "http-source")]
static HTTP_CLIENT: once_cell::sync::Lazy<reqwest::Client> = once_cell::sync::Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(concat!("tilescape/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(30))
        .tcp_keepalive(std::time::Duration::from_secs(30))
        .pool_max_idle_per_host(16)
        .build()
        .expect("failed to build tilescape http client")
});

/// Tile source fetching from an XYZ URL template with `{s}`/`{x}`/`{y}`/`{z}`
/// placeholders and round-robin subdomain rotation.
#[cfg(feature = "http-source")]
pub struct HttpTileSource {
    url_template: String,
    subdomains: Vec<String>,
    attribution: Option<String>,
}

#[cfg(feature = "http-source")]
impl HttpTileSource {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            subdomains: Vec::new(),
            attribution: None,
        }
    }

    pub fn with_subdomains(mut self, subdomains: Vec<String>) -> Self {
        self.subdomains = subdomains;
        self
    }

    pub fn with_attribution(mut self, attribution: impl Into<String>) -> Self {
        self.attribution = Some(attribution.into());
        self
    }

    /// The default OpenStreetMap tile server.
    pub fn openstreetmap() -> Self {
        Self::new("https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png")
            .with_subdomains(vec!["a".into(), "b".into(), "c".into()])
            .with_attribution("© OpenStreetMap contributors")
    }

    /// Builds the URL for the requested coordinate.
    pub fn url(&self, coords: TileCoord) -> String {
        let sub = if self.subdomains.is_empty() {
            ""
        } else {
            let idx = (coords.x.unsigned_abs() + coords.y.unsigned_abs()) as usize
                % self.subdomains.len();
            self.subdomains[idx].as_str()
        };
        self.url_template
            .replace("{s}", sub)
            .replace("{x}", &coords.x.to_string())
            .replace("{y}", &coords.y.to_string())
            .replace("{z}", &coords.z.to_string())
    }
}

#[cfg(feature = "http-source")]
#[async_trait]
impl TileSource for HttpTileSource {
    async fn load(&self, coords: TileCoord) -> Result<Vec<u8>> {
        let url = self.url(coords);
        let response = HTTP_CLIENT.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(crate::MapError::TileLoad(format!(
                "HTTP {} for tile {}",
                response.status(),
                coords.key()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }

    fn attribution(&self) -> Option<&str> {
        self.attribution.as_deref()
    }
}

/// Deterministic in-process source for tests and offline demos: resolves
/// every tile with its key as bytes, except coordinates told to fail.
#[derive(Debug, Default)]
pub struct FixedTileSource {
    fail: crate::prelude::HashSet<String>,
    delay: Option<crate::prelude::Duration>,
}

impl FixedTileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, coords: TileCoord) -> Self {
        self.fail.insert(coords.key());
        self
    }

    pub fn with_delay(mut self, delay: crate::prelude::Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl TileSource for FixedTileSource {
    async fn load(&self, coords: TileCoord) -> Result<Vec<u8>> {
        if let Some(delay) = self.delay {
            crate::runtime::sleep(delay).await;
        }
        let key = coords.key();
        if self.fail.contains(&key) {
            Err(crate::MapError::TileLoad(format!("tile {} unavailable", key)))
        } else {
            Ok(key.into_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "http-source")]
    #[test]
    fn test_url_template() {
        let source = HttpTileSource::new("https://{s}.tiles.example/{z}/{x}/{y}.png")
            .with_subdomains(vec!["a".into(), "b".into()]);
        let url = source.url(TileCoord::new(3, 5, 7));
        assert_eq!(url, "https://a.tiles.example/7/3/5.png");

        let rotated = source.url(TileCoord::new(4, 5, 7));
        assert_eq!(rotated, "https://b.tiles.example/7/4/5.png");
    }

    #[test]
    fn test_fixed_source_payloads() {
        let source = FixedTileSource::new().failing_on(TileCoord::new(1, 1, 1));
        let ok = futures::executor::block_on(source.load(TileCoord::new(0, 0, 1)));
        assert_eq!(ok.unwrap(), b"0:0:1".to_vec());

        let err = futures::executor::block_on(source.load(TileCoord::new(1, 1, 1)));
        assert!(err.is_err());
    }
}
