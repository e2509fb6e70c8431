//! Production implementations of the opaque collaborators defined in
//! [`crate::traits`]. Kept here rather than in `engine`/`extract`/`api` so
//! both the worker and API binaries can share one client without an
//! inter-binary dependency. Follows the same `reqwest::Client` + configurable
//! base URL + JSON POST shape as `crawl::webhook::HttpWebhookSender`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::config::IntegrationsConfig;
use crate::traits::{BillableScrape, Billing, LlmExtractor, MultiEntityClassification};
use crate::AppError;

/// Calls an OpenAI-compatible chat-completions endpoint for schema-guided
/// extraction, schema authoring, and multi-entity classification. One HTTP
/// client, three different system prompts.
pub struct HttpLlmExtractor {
    client: reqwest::Client,
    config: IntegrationsConfig,
}

impl HttpLlmExtractor {
    pub fn new(config: IntegrationsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, AppError> {
        let mut request = self.client.post(&self.config.llm_api_url).json(&json!({
            "model": self.config.llm_model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "response_format": {"type": "json_object"},
        }));

        if let Some(key) = &self.config.llm_api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?.error_for_status()?;
        let body: Value = response.json().await?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AppError::Internal("llm response missing message content".to_string()))
    }
}

#[async_trait]
impl LlmExtractor for HttpLlmExtractor {
    async fn extract(&self, content: &str, schema: Option<&Value>) -> Result<Value, AppError> {
        let system = match schema {
            Some(schema) => format!(
                "Extract data matching this JSON schema from the document. Respond with JSON only.\nSchema: {schema}"
            ),
            None => "Extract the key structured information from the document as JSON.".to_string(),
        };
        let raw = self.chat(&system, content).await?;
        serde_json::from_str(&raw).map_err(|e| AppError::Internal(format!("llm returned invalid json: {e}")))
    }

    async fn generate_schema_from_prompt(&self, prompt: &str) -> Result<Value, AppError> {
        let system = "Generate a JSON Schema (draft-07) describing the structure the user wants extracted. Respond with the schema only, as JSON.";
        let raw = self.chat(system, prompt).await?;
        serde_json::from_str(&raw).map_err(|e| AppError::Internal(format!("llm returned invalid schema: {e}")))
    }

    async fn classify_multi_entity(&self, schema: &Value) -> Result<MultiEntityClassification, AppError> {
        let system = "Given a JSON Schema, decide whether it describes a single answer or a list of entities. \
                       Respond with JSON: {\"is_multi_entity\": bool, \"multi_entity_keys\": [string], \"reasoning\": string}.";
        let raw = self.chat(system, &schema.to_string()).await?;
        let parsed: Value = serde_json::from_str(&raw)
            .map_err(|e| AppError::Internal(format!("llm returned invalid classification: {e}")))?;

        Ok(MultiEntityClassification {
            is_multi_entity: parsed["is_multi_entity"].as_bool().unwrap_or(false),
            multi_entity_keys: parsed["multi_entity_keys"]
                .as_array()
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
            reasoning: parsed["reasoning"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn rephrase_query(&self, prompt: &str) -> Result<String, AppError> {
        let system = "Rephrase the user's request into a concise web search query. Respond with JSON: {\"query\": string}.";
        let raw = self.chat(system, prompt).await?;
        let parsed: Value = serde_json::from_str(&raw).unwrap_or(json!({"query": prompt}));
        Ok(parsed["query"].as_str().unwrap_or(prompt).to_string())
    }
}

/// Formula-based credit accounting: factors formats, PDF pages, proxy
/// type, zero-data-retention, and agent usage. `charge` persists a debit through
/// an operator-configured billing API, gated by `USE_DB_AUTHENTICATION`
/// so a deployment without a billing backend can still run.
pub struct ConfiguredBilling {
    client: reqwest::Client,
    config: IntegrationsConfig,
    billing_api_url: Option<String>,
}

impl ConfiguredBilling {
    pub fn new(config: IntegrationsConfig, billing_api_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            billing_api_url,
        }
    }
}

#[async_trait]
impl Billing for ConfiguredBilling {
    async fn charge(&self, team_id: uuid::Uuid, credits: f64) -> Result<(), AppError> {
        if !self.config.use_db_authentication {
            return Ok(());
        }
        let Some(url) = &self.billing_api_url else {
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(&json!({"team_id": team_id, "credits": credits}))
            .send()
            .await;

        if let Err(e) = response {
            warn!(%team_id, credits, error = %e, "billing charge request failed");
        }
        Ok(())
    }

    fn calculate_credits_to_be_billed(&self, request: &BillableScrape) -> f64 {
        let mut credits = 1.0;

        if let Some(num_pages) = request.num_pages {
            credits *= num_pages.max(1) as f64;
        }
        if request.used_stealth_proxy {
            credits *= 5.0;
        }
        if request.used_agent {
            credits += 5.0;
        }
        if request.zero_data_retention {
            credits *= 1.0;
        }
        if request.formats.iter().any(|f| f == "json" || f == "extract") {
            credits += 4.0;
        }
        if request.formats.iter().any(|f| f == "screenshot") {
            credits += 1.0;
        }

        credits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> IntegrationsConfig {
        IntegrationsConfig {
            llm_api_url: String::new(),
            llm_api_key: None,
            llm_model: String::new(),
            use_db_authentication: false,
        }
    }

    #[test]
    fn base_scrape_costs_one_credit() {
        let billing = ConfiguredBilling::new(config(), None);
        let credits = billing.calculate_credits_to_be_billed(&BillableScrape::default());
        assert_eq!(credits, 1.0);
    }

    #[test]
    fn stealth_proxy_and_pdf_pages_multiply_cost() {
        let billing = ConfiguredBilling::new(config(), None);
        let request = BillableScrape {
            num_pages: Some(3),
            used_stealth_proxy: true,
            ..Default::default()
        };
        assert_eq!(billing.calculate_credits_to_be_billed(&request), 15.0);
    }

    #[tokio::test]
    async fn charge_is_a_noop_without_db_authentication() {
        let billing = ConfiguredBilling::new(config(), Some("https://billing.invalid".to_string()));
        billing.charge(uuid::Uuid::new_v4(), 10.0).await.unwrap();
    }
}
