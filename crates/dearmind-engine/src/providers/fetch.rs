use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;

use crate::services::ImageFetcher;

/// Plain GET for drawings submitted as URLs.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    http: HttpClient,
    timeout: Duration,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: HttpClient::new(),
            timeout,
        }
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .with_context(|| format!("image download failed ({url})"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("image download failed ({url}): HTTP {}", status.as_u16());
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("image body read failed ({url})"))?;
        Ok(bytes.to_vec())
    }
}
