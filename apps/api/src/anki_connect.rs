//! Client for the AnkiConnect add-on's HTTP API.
//!
//! Every request is `{"action", "version": 6, "params"}` posted to the bridge
//! URL; every response is `{"result", "error"}` with exactly one of them set.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

const API_VERSION: u32 = 6;
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum AnkiConnectError {
    #[error("cannot reach AnkiConnect at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("AnkiConnect error: {0}")]
    Api(String),

    #[error("AnkiConnect returned no result for {0}")]
    EmptyResult(&'static str),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    result: Option<T>,
    error: Option<String>,
}

/// A note in the shape `addNotes` expects.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnkiNote {
    pub deck_name: String,
    pub model_name: String,
    pub fields: BTreeMap<String, String>,
    pub tags: Vec<String>,
}

#[derive(Clone)]
pub struct AnkiConnectClient {
    client: Client,
}

impl AnkiConnectClient {
    pub fn new() -> Result<Self, AnkiConnectError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }

    async fn invoke<T: DeserializeOwned>(
        &self,
        url: &str,
        action: &'static str,
        params: Value,
    ) -> Result<Option<T>, AnkiConnectError> {
        let unreachable = |source| AnkiConnectError::Unreachable {
            url: url.to_string(),
            source,
        };

        debug!(action, url, "AnkiConnect request");
        let body = json!({ "action": action, "version": API_VERSION, "params": params });
        let response: ApiResponse<T> = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(unreachable)?
            .error_for_status()
            .map_err(unreachable)?
            .json()
            .await
            .map_err(unreachable)?;

        match response.error {
            Some(message) => Err(AnkiConnectError::Api(message)),
            None => Ok(response.result),
        }
    }

    /// API version reported by the bridge; used as a connectivity check.
    pub async fn version(&self, url: &str) -> Result<u32, AnkiConnectError> {
        self.invoke(url, "version", json!({}))
            .await?
            .ok_or(AnkiConnectError::EmptyResult("version"))
    }

    /// Creates the deck if missing and returns its ID.
    pub async fn create_deck(&self, url: &str, deck: &str) -> Result<i64, AnkiConnectError> {
        self.invoke(url, "createDeck", json!({ "deck": deck }))
            .await?
            .ok_or(AnkiConnectError::EmptyResult("createDeck"))
    }

    /// Adds notes; the result has one entry per note, `None` for duplicates
    /// and rejected notes.
    pub async fn add_notes(
        &self,
        url: &str,
        notes: &[AnkiNote],
    ) -> Result<Vec<Option<i64>>, AnkiConnectError> {
        if notes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .invoke(url, "addNotes", json!({ "notes": notes }))
            .await?
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use axum::{routing::post, Json, Router};

    use super::*;

    /// Serves a fake bridge on an ephemeral port and returns its URL.
    async fn fake_bridge() -> String {
        async fn handle(Json(body): Json<Value>) -> Json<Value> {
            assert_eq!(body["version"], 6);
            let reply = match body["action"].as_str() {
                Some("version") => json!({ "result": 6, "error": null }),
                Some("createDeck") => json!({ "result": 1700000000000_i64, "error": null }),
                Some("addNotes") => {
                    let count = body["params"]["notes"].as_array().map_or(0, Vec::len);
                    let mut ids: Vec<Value> = (0..count).map(|i| json!(100 + i)).collect();
                    if let Some(last) = ids.last_mut() {
                        *last = Value::Null;
                    }
                    json!({ "result": ids, "error": null })
                }
                _ => json!({ "result": null, "error": "unsupported action" }),
            };
            Json(reply)
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/", post(handle)))
                .await
                .unwrap();
        });
        format!("http://{addr}/")
    }

    fn note(front: &str) -> AnkiNote {
        AnkiNote {
            deck_name: "Renforce".into(),
            model_name: "Basic".into(),
            fields: BTreeMap::from([
                ("Front".to_string(), front.to_string()),
                ("Back".to_string(), "b".to_string()),
            ]),
            tags: vec!["auto".into()],
        }
    }

    #[tokio::test]
    async fn test_version_and_add_notes() {
        let url = fake_bridge().await;
        let client = AnkiConnectClient::new().unwrap();

        assert_eq!(client.version(&url).await.unwrap(), 6);
        assert_eq!(client.create_deck(&url, "Renforce").await.unwrap(), 1700000000000);

        let ids = client.add_notes(&url, &[note("a"), note("b")]).await.unwrap();
        assert_eq!(ids, vec![Some(100), None]);
    }

    #[tokio::test]
    async fn test_add_no_notes_skips_request() {
        let client = AnkiConnectClient::new().unwrap();
        let ids = client.add_notes("http://127.0.0.1:9/", &[]).await.unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_bridge() {
        let client = AnkiConnectClient::new().unwrap();
        let err = client.version("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(err, AnkiConnectError::Unreachable { .. }));
    }

    #[test]
    fn test_note_serializes_camel_case() {
        let value = serde_json::to_value(note("q")).unwrap();
        assert_eq!(value["deckName"], "Renforce");
        assert_eq!(value["modelName"], "Basic");
        assert_eq!(value["fields"]["Front"], "q");
    }
}
