// src/cvm/client.rs
use std::time::Duration;

use reqwest::{header, StatusCode, Url};

use crate::config::CvmSettings;
use crate::cvm::parser::parse_metadata_page;
use crate::cvm::FilingSource;
use crate::model::{NsdRecord, SheetSpec};
use crate::utils::error::FetchError;

/// Fetches filing pages from the CVM document viewer, one request at a time
/// with a fixed delay before each.
pub struct CvmClient {
    client: reqwest::Client,
    settings: CvmSettings,
}

impl CvmClient {
    /// Creates a reqwest client configured for CVM interaction.
    pub fn new(settings: &CvmSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }

    fn page_url(&self, template: &str, substitutions: &[(&str, &str)]) -> Result<Url, FetchError> {
        let mut path = template.to_string();
        for (placeholder, value) in substitutions {
            path = path.replace(placeholder, value);
        }
        let raw = format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path.trim_start_matches('/'));
        Url::parse(&raw).map_err(|e| FetchError::Url(format!("{} ({})", raw, e)))
    }

    pub fn metadata_url(&self, nsd: u64) -> Result<Url, FetchError> {
        let nsd = nsd.to_string();
        self.page_url(&self.settings.metadata_path, &[("{nsd}", nsd.as_str())])
    }

    pub fn statement_url(&self, nsd: u64, sheet: &SheetSpec) -> Result<Url, FetchError> {
        let nsd = nsd.to_string();
        self.page_url(
            &self.settings.statement_path,
            &[
                ("{nsd}", nsd.as_str()),
                ("{grupo}", sheet.scope.label()),
                ("{quadro}", sheet.kind.as_str()),
            ],
        )
    }

    /// Downloads `url`. A 404 means the page does not exist and yields
    /// `None`; network errors, 403 and 5xx are retried after a fixed delay.
    async fn get_page(&self, url: Url) -> Result<Option<String>, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            tokio::time::sleep(Duration::from_millis(self.settings.request_delay_ms)).await;

            match self.try_get(url.clone()).await {
                Ok(page) => return Ok(page),
                Err(e) if attempt <= self.settings.max_retries && is_retryable(&e) => {
                    tracing::warn!(
                        "Attempt {} for {} failed ({}), retrying in {} ms",
                        attempt,
                        url,
                        e,
                        self.settings.retry_delay_ms
                    );
                    tokio::time::sleep(Duration::from_millis(self.settings.retry_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_get(&self, url: Url) -> Result<Option<String>, FetchError> {
        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, "text/html,*/*")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::NOT_FOUND {
                tracing::debug!("Received 404 Not Found for URL: {}", url);
                return Ok(None);
            }
            if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
                tracing::warn!("Received {} - CVM is throttling requests.", status);
                return Err(FetchError::RateLimited);
            }
            tracing::error!("HTTP error status: {} for URL: {}", status, url);
            return Err(FetchError::Http(status));
        }

        let body = response.text().await?;
        tracing::debug!("Downloaded {} bytes from {}", body.len(), url);
        Ok(Some(body))
    }
}

fn is_retryable(error: &FetchError) -> bool {
    match error {
        FetchError::Network(_) | FetchError::RateLimited => true,
        FetchError::Http(status) => status.is_server_error(),
        FetchError::Url(_) | FetchError::Parse(_) => false,
    }
}

impl FilingSource for CvmClient {
    async fn fetch_metadata(&self, nsd: u64) -> Result<Option<NsdRecord>, FetchError> {
        let Some(html) = self.get_page(self.metadata_url(nsd)?).await? else {
            return Ok(None);
        };
        Ok(parse_metadata_page(nsd, &html)?)
    }

    async fn fetch_statement(&self, nsd: u64, sheet: &SheetSpec) -> Result<Option<String>, FetchError> {
        self.get_page(self.statement_url(nsd, sheet)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StatementScope;

    #[test]
    fn test_urls_substitute_and_encode() {
        let client = CvmClient::new(&CvmSettings::default()).unwrap();

        let metadata = client.metadata_url(52000).unwrap();
        assert_eq!(metadata.host_str(), Some("www.rad.cvm.gov.br"));
        assert!(metadata.as_str().contains("NumeroSequencialDocumento=52000"));

        let sheet = SheetSpec::new(StatementScope::Consolidated, "Demonstração do Resultado");
        let statement = client.statement_url(52000, &sheet).unwrap();
        let pairs: Vec<(String, String)> = statement.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("Grupo".to_string(), "DFs Consolidadas".to_string())));
        assert!(pairs.contains(&("Quadro".to_string(), "Demonstração do Resultado".to_string())));
        assert!(!statement.as_str().contains(' '));
    }

    #[test]
    fn test_bad_base_url_is_reported() {
        let settings = CvmSettings {
            base_url: "not a url".to_string(),
            ..CvmSettings::default()
        };
        let client = CvmClient::new(&settings).unwrap();
        assert!(matches!(client.metadata_url(1), Err(FetchError::Url(_))));
    }

    #[test]
    fn test_retry_policy() {
        assert!(is_retryable(&FetchError::RateLimited));
        assert!(is_retryable(&FetchError::Http(StatusCode::BAD_GATEWAY)));
        assert!(!is_retryable(&FetchError::Http(StatusCode::BAD_REQUEST)));
        assert!(!is_retryable(&FetchError::Url("x".to_string())));
    }
}
