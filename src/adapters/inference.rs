use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::{Adapter, ModelHandle};
use crate::apps::args::{Arg, Args};
use crate::apps::task::{Model, TaskFn};
use crate::core::config::Config;
use crate::core::errors::{PipesError, Result};

/// Inference provider serving a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// The platform's own inference endpoint
    Platform,
    OpenAi,
    Replicate,
}

impl Provider {
    pub fn for_model(model: &Model) -> Self {
        match model {
            Model::Bloom => Provider::Platform,
            Model::Gpt35 | Model::Gpt3 => Provider::OpenAi,
            Model::StableDiffusion | Model::External(_) => Provider::Replicate,
        }
    }
}

/// Blocking JSON client for one provider endpoint
#[derive(Debug, Clone)]
pub struct HttpModelClient {
    provider: Provider,
    model: String,
    task_id: String,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpModelClient {
    /// Resolve the endpoint and credentials for `model` from `config`
    pub fn for_model(config: &Config, task_id: &str, model: &Model) -> Result<Self> {
        let provider = Provider::for_model(model);
        let (url, api_key) = match (provider, model) {
            (Provider::Platform, _) => {
                let endpoint = config.inference_endpoint.as_deref().ok_or_else(|| {
                    PipesError::configuration_field(
                        "no inference endpoint configured for bloom tasks",
                        "inference_endpoint",
                    )
                })?;
                (join(endpoint, "completions"), config.api_key.clone())
            }
            (Provider::OpenAi, Model::Gpt3) => (
                join(&config.openai_endpoint, "completions"),
                config.openai_api_key.clone(),
            ),
            (Provider::OpenAi, _) => (
                join(&config.openai_endpoint, "chat/completions"),
                config.openai_api_key.clone(),
            ),
            (Provider::Replicate, _) => (
                join(&config.replicate_endpoint, "predictions"),
                config.replicate_api_key.clone(),
            ),
        };

        Ok(Self {
            provider,
            model: model.as_str().to_string(),
            task_id: task_id.to_string(),
            url,
            api_key,
            timeout: config.request_timeout(),
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request body sent to the provider for `payload`
    pub fn request_body(&self, payload: Value) -> Value {
        match self.provider {
            Provider::Replicate => json!({ "version": self.model, "input": payload }),
            Provider::Platform | Provider::OpenAi => payload,
        }
    }

    fn authorization(&self) -> Option<String> {
        let key = self.api_key.as_ref()?;
        Some(match self.provider {
            Provider::Replicate => format!("Token {key}"),
            Provider::Platform | Provider::OpenAi => format!("Bearer {key}"),
        })
    }
}

impl super::ModelClient for HttpModelClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn call(&self, payload: Value) -> Result<Value> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| PipesError::adapter_with_source(&self.task_id, "failed to build HTTP client", e))?;

        let mut request = client.post(&self.url).json(&self.request_body(payload));
        if let Some(auth) = self.authorization() {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }

        debug!("POST {} for task {} ({:?})", self.url, self.task_id, self.provider);
        let response = request
            .send()
            .map_err(|e| PipesError::adapter_with_source(&self.task_id, "request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(PipesError::adapter(
                &self.task_id,
                format!("{} returned {}: {}", self.url, status, body),
            ));
        }

        response
            .json::<Value>()
            .map_err(|e| PipesError::adapter_with_source(&self.task_id, "invalid JSON response", e))
    }
}

fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// Calls the task function with a model client appended to its arguments
pub struct InferenceAdapter {
    func: TaskFn,
    task_id: String,
    client: ModelHandle,
}

impl InferenceAdapter {
    pub fn new(func: TaskFn, task_id: &str, client: ModelHandle) -> Self {
        Self {
            func,
            task_id: task_id.to_string(),
            client,
        }
    }
}

impl Adapter for InferenceAdapter {
    fn process(&self, mut args: Args) -> Result<Value> {
        info!("Inference task {} using model {}", self.task_id, self.client.model());
        args.push(Arg::Model(self.client.clone()));
        (self.func)(args).map_err(|e| PipesError::from_task_failure(&self.task_id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ModelClient;
    use std::sync::Arc;

    fn config() -> Config {
        let mut cfg = Config::default();
        cfg.inference_endpoint = Some("https://inference.local/v1/".into());
        cfg.api_key = Some("platform-key".into());
        cfg.openai_api_key = Some("sk-test".into());
        cfg.replicate_api_key = Some("r8-test".into());
        cfg
    }

    #[test]
    fn test_endpoint_selection() {
        let cfg = config();
        let bloom = HttpModelClient::for_model(&cfg, "t", &Model::Bloom).unwrap();
        assert_eq!(bloom.url(), "https://inference.local/v1/completions");
        assert_eq!(bloom.authorization().as_deref(), Some("Bearer platform-key"));

        let chat = HttpModelClient::for_model(&cfg, "t", &Model::Gpt35).unwrap();
        assert_eq!(chat.url(), "https://api.openai.com/v1/chat/completions");

        let legacy = HttpModelClient::for_model(&cfg, "t", &Model::Gpt3).unwrap();
        assert_eq!(legacy.url(), "https://api.openai.com/v1/completions");

        let custom =
            HttpModelClient::for_model(&cfg, "t", &Model::External("llama-2".into())).unwrap();
        assert_eq!(custom.provider(), Provider::Replicate);
        assert_eq!(custom.authorization().as_deref(), Some("Token r8-test"));
        assert_eq!(
            custom.request_body(json!({"prompt": "hi"})),
            json!({"version": "llama-2", "input": {"prompt": "hi"}})
        );
    }

    #[test]
    fn test_bloom_without_endpoint_is_configuration_error() {
        let err = HttpModelClient::for_model(&Config::default(), "t", &Model::Bloom).unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    struct EchoModel;

    impl ModelClient for EchoModel {
        fn model(&self) -> &str {
            "echo"
        }

        fn call(&self, payload: Value) -> Result<Value> {
            Ok(json!({ "echo": payload }))
        }
    }

    #[test]
    fn test_adapter_appends_model_client() {
        let func: TaskFn = Arc::new(|args: Args| {
            assert_eq!(args.len(), 2);
            let model = args.model().ok_or_else(|| anyhow::anyhow!("missing model"))?;
            Ok(model.call(args.value(0).cloned().unwrap_or_default())?)
        });
        let adapter = InferenceAdapter::new(func, "echo-task", Arc::new(EchoModel));
        let out = adapter.process(Args::from(json!("hello"))).unwrap();
        assert_eq!(out, json!({"echo": "hello"}));
    }
}
