use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::ProvisionerError;

/// Thin client for the gateway's Admin API.
#[derive(Clone)]
pub struct KongAdmin {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct Consumer {
    pub id: String,
    #[serde(default)]
    pub custom_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

impl KongAdmin {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Finds the consumer tagged with `custom_id`, creating it when missing.
    /// Repeating it for the same user is harmless.
    #[instrument(skip(self, username))]
    pub async fn ensure_consumer(
        &self,
        custom_id: &str,
        username: &str,
    ) -> Result<Consumer, ProvisionerError> {
        if let Some(found) = self.find_consumer(custom_id).await? {
            debug!(consumer_id = %found.id, "consumer exists");
            return Ok(found);
        }

        let res = self
            .http
            .post(self.url("/consumers"))
            .json(&json!({ "username": username, "custom_id": custom_id }))
            .send()
            .await;
        match read_json::<Consumer>(res, "create consumer").await {
            Ok(created) => {
                debug!(consumer_id = %created.id, custom_id = ?created.custom_id, "consumer created");
                Ok(created)
            }
            // a concurrent create won, or the username is held by another consumer
            Err(ProvisionerError::Rejected(msg)) => self
                .find_consumer(custom_id)
                .await?
                .ok_or(ProvisionerError::Rejected(msg)),
            Err(e) => Err(e),
        }
    }

    async fn find_consumer(&self, custom_id: &str) -> Result<Option<Consumer>, ProvisionerError> {
        let res = self
            .http
            .get(self.url("/consumers"))
            .query(&[("custom_id", custom_id)])
            .send()
            .await;
        let page: Page<Consumer> = read_json(res, "find consumer").await?;
        Ok(page.data.into_iter().next())
    }

    /// Lists credentials of one plugin kind (`oauth2`, `jwt`) for a consumer.
    #[instrument(skip(self))]
    pub async fn list_credentials<T>(
        &self,
        consumer: &str,
        plugin: &str,
    ) -> Result<Vec<T>, ProvisionerError>
    where
        T: DeserializeOwned,
    {
        let res = self
            .http
            .get(self.url(&format!("/consumers/{consumer}/{plugin}")))
            .send()
            .await;
        let page: Page<T> = read_json(res, "list credentials").await?;
        Ok(page.data)
    }

    #[instrument(skip(self, body))]
    pub async fn create_credential<B, T>(
        &self,
        consumer: &str,
        plugin: &str,
        body: &B,
    ) -> Result<T, ProvisionerError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let res = self
            .http
            .post(self.url(&format!("/consumers/{consumer}/{plugin}")))
            .json(body)
            .send()
            .await;
        read_json(res, "create credential").await
    }
}

/// Classifies a gateway response: transport errors, 5xx and unreadable bodies are
/// transient, 4xx is a refusal.
pub(crate) async fn read_json<T>(
    res: Result<reqwest::Response, reqwest::Error>,
    what: &str,
) -> Result<T, ProvisionerError>
where
    T: DeserializeOwned,
{
    let res = res.map_err(|e| {
        warn!(error = %e, call = what, "gateway call failed");
        ProvisionerError::Unavailable(format!("{what}: {e}"))
    })?;

    let status = res.status();
    if !status.is_success() {
        let body: Value = res.json().await.unwrap_or(Value::Null);
        let detail = gateway_message(&body).unwrap_or_else(|| status.to_string());
        warn!(%status, call = what, detail = %detail, "gateway returned an error");
        return Err(if status.is_client_error() {
            ProvisionerError::Rejected(format!("{what}: {detail}"))
        } else {
            ProvisionerError::Unavailable(format!("{what}: {status} {detail}"))
        });
    }

    res.json::<T>()
        .await
        .map_err(|e| ProvisionerError::Unavailable(format!("{what}: malformed response: {e}")))
}

fn gateway_message(body: &Value) -> Option<String> {
    ["message", "error_description", "error"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}
