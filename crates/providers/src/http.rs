//! Shared HTTP adapter for provider integrations.
//!
//! Wraps [`reqwest`] with the JSON request/response handling every
//! vendor client needs: success checking, body capture on error, and
//! typed deserialization.

use crate::provider::ProviderError;

/// JSON HTTP client scoped to one provider's base URL.
pub struct ProviderHttp {
    client: reqwest::Client,
    base_url: String,
}

impl ProviderHttp {
    /// Create a client for a provider API.
    ///
    /// * `base_url` - Base HTTP URL, e.g. `https://api.example.com/v1`.
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// Create a client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling across providers).
    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    /// Send a `POST` with a JSON body and parse the JSON response.
    pub async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        Self::parse_response(response).await
    }

    /// Send a `GET` and parse the JSON response.
    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        Self::parse_response(response).await
    }

    /// Download raw bytes from an absolute URL (provider-hosted output
    /// files live outside the API base URL).
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        fetch_bytes(&self.client, url).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ProviderError::Api`]
    /// containing the status and body text on failure.
    pub(crate) async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let response = Self::ensure_success(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

/// Download raw bytes from an absolute URL with an existing client.
pub async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, ProviderError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ProviderError::Request(e.to_string()))?;

    let response = ProviderHttp::ensure_success(response).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProviderError::Request(e.to_string()))?;
    Ok(bytes.to_vec())
}
