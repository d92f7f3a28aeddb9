//! Backend for a model service on the local network.
//!
//! Speaks the Ollama HTTP API. Only the single endpoint handed over by the
//! network policy may be contacted; descriptors pointing anywhere else are
//! refused before any connection is opened.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use super::InferenceBackend;
use crate::config::ConfigError;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::{ArtifactLocation, BackendKind, InferenceParams, ModelDescriptor};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
    num_ctx: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct RemoteServiceBackend {
    authorized: Option<Url>,
    timeout: Duration,
    client: Client,
    /// Origins that passed a health check
    healthy: Mutex<HashSet<String>>,
}

impl RemoteServiceBackend {
    pub fn new(authorized_endpoint: Option<String>, timeout: Duration) -> OrchestratorResult<Self> {
        let authorized = authorized_endpoint
            .map(|raw| {
                Url::parse(&raw).map_err(|e| {
                    OrchestratorError::Config(ConfigError::Invalid(format!(
                        "authorized endpoint '{raw}': {e}"
                    )))
                })
            })
            .transpose()?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrchestratorError::BackendUnavailable {
                backend: "remote".to_string(),
                reason: format!("failed to build http client: {e}"),
            })?;

        Ok(Self {
            authorized,
            timeout,
            client,
            healthy: Mutex::new(HashSet::new()),
        })
    }

    fn unavailable(&self, reason: impl Into<String>) -> OrchestratorError {
        OrchestratorError::BackendUnavailable {
            backend: self.name().to_string(),
            reason: reason.into(),
        }
    }

    /// Resolve the descriptor's endpoint, refusing anything not authorized.
    fn authorize<'a>(&self, descriptor: &'a ModelDescriptor) -> OrchestratorResult<(Url, &'a str)> {
        let ArtifactLocation::Endpoint { base_url, model } = &descriptor.location else {
            return Err(self.unavailable(format!("'{}' is not a remote model", descriptor.id)));
        };
        let Some(authorized) = &self.authorized else {
            return Err(self.unavailable("no endpoint is authorized"));
        };
        let url = Url::parse(base_url)
            .map_err(|e| self.unavailable(format!("invalid endpoint '{base_url}': {e}")))?;

        let same_origin = url.scheme() == authorized.scheme()
            && url.host_str() == authorized.host_str()
            && url.port_or_known_default() == authorized.port_or_known_default();
        if !same_origin {
            tracing::warn!(
                model = %descriptor.id,
                endpoint = %base_url,
                "refusing unauthorized endpoint"
            );
            return Err(self.unavailable(format!("endpoint '{base_url}' is not authorized")));
        }
        Ok((url, model))
    }

    fn endpoint(base: &Url, path: &str) -> String {
        format!("{}/{path}", base.as_str().trim_end_matches('/'))
    }

    async fn ensure_healthy(&self, model_id: &str, base: &Url) -> OrchestratorResult<()> {
        let origin = base.origin().ascii_serialization();
        if self.healthy.lock().contains(&origin) {
            return Ok(());
        }

        let response = self
            .client
            .get(Self::endpoint(base, "api/tags"))
            .send()
            .await
            .map_err(|e| self.map_error(model_id, e))?;

        if !response.status().is_success() {
            return Err(self.unavailable(format!(
                "health check returned {}",
                response.status()
            )));
        }

        tracing::info!(endpoint = %origin, "remote endpoint healthy");
        self.healthy.lock().insert(origin);
        Ok(())
    }

    fn map_error(&self, model_id: &str, err: reqwest::Error) -> OrchestratorError {
        if err.is_timeout() {
            OrchestratorError::InferenceTimeout {
                model_id: model_id.to_string(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else if err.is_connect() {
            self.unavailable(err.to_string())
        } else {
            OrchestratorError::Inference {
                model_id: model_id.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl InferenceBackend for RemoteServiceBackend {
    fn name(&self) -> &str {
        "remote"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn load(&self, descriptor: &ModelDescriptor) -> OrchestratorResult<()> {
        let (base, _) = self.authorize(descriptor)?;
        self.ensure_healthy(&descriptor.id, &base).await
    }

    async fn unload(&self, model_id: &str) -> OrchestratorResult<()> {
        tracing::debug!(model = %model_id, "remote model released");
        Ok(())
    }

    async fn infer(
        &self,
        descriptor: &ModelDescriptor,
        prompt: &str,
        params: &InferenceParams,
    ) -> OrchestratorResult<String> {
        let (base, model) = self.authorize(descriptor)?;
        self.ensure_healthy(&descriptor.id, &base).await?;

        tracing::debug!(model = %descriptor.id, remote_model = %model, "running remote inference");

        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
                num_ctx: params.context_window,
            },
        };

        let response = self
            .client
            .post(Self::endpoint(&base, "api/generate"))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_error(&descriptor.id, e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Inference {
                model_id: descriptor.id.clone(),
                reason: format!("service returned {status}: {message}"),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| self.map_error(&descriptor.id, e))?;
        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn backend(endpoint: Option<&str>) -> RemoteServiceBackend {
        RemoteServiceBackend::new(endpoint.map(String::from), Duration::from_secs(2)).unwrap()
    }

    /// Minimal HTTP responder: `/api/tags` is healthy, `/api/generate` answers
    /// with `reply`. Every request closes its connection.
    async fn spawn_fake_service(reply: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    let header_end = loop {
                        let n = stream.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                            break pos + 4;
                        }
                    };
                    let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
                    let content_length = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    while buf.len() < header_end + content_length {
                        let n = stream.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                    }

                    let body = if head.starts_with("get /api/tags") {
                        r#"{"models":[]}"#.to_string()
                    } else {
                        serde_json::json!({ "response": reply, "done": true }).to_string()
                    };
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn refuses_when_nothing_is_authorized() {
        let d = ModelDescriptor::remote("lan", "http://127.0.0.1:9", "llama3");
        let err = backend(None).load(&d).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn refuses_other_endpoints() {
        let b = backend(Some("http://10.0.0.5:11434"));
        let d = ModelDescriptor::remote("lan", "http://10.0.0.6:11434", "llama3");
        let err = b
            .infer(&d, "hi", &InferenceParams::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not authorized"));
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let b = backend(Some(&endpoint));
        let d = ModelDescriptor::remote("lan", endpoint.clone(), "llama3");
        let err = b.load(&d).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn generates_against_authorized_service() {
        let endpoint = spawn_fake_service("Use a strong, unique password.").await;
        let b = backend(Some(&endpoint));
        let d = ModelDescriptor::remote("lan", endpoint.clone(), "llama3");

        b.load(&d).await.unwrap();
        let out = b
            .infer(&d, "password tips?", &InferenceParams::default())
            .await
            .unwrap();
        assert_eq!(out, "Use a strong, unique password.");
    }
}
