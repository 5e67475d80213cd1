// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! JSON request decoding for the trigger boundary.
//!
//! Requests look like
//!
//! ```json
//! {"api":"target_log_pull_ext","params":{"upload_location":"https://…","upload_token":"…"}}
//! ```
//!
//! and the response is the request object itself with `errCode` and `errMsg` added.

use crate::coordinator::{LogPull, TriggerResponse};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

pub const LOG_PULL_API: &str = "target_log_pull_ext";

const PARSE_ERROR_RESPONSE: &str = r#"{"errCode":"500","errMsg":"JSON Parsing Error:"}"#;

#[derive(Debug, Deserialize)]
struct LogPullParams {
    upload_location: String,
    upload_token: String,
    #[serde(default)]
    upload_method: Option<String>,
}

pub struct Dispatcher {
    log_pull: Arc<LogPull>,
}

impl Dispatcher {
    pub fn new(log_pull: Arc<LogPull>) -> Self {
        Self { log_pull }
    }

    /// Handles one JSON request and returns the JSON response.
    pub async fn dispatch(&self, request: &str) -> String {
        let mut object = match serde_json::from_str::<Value>(request) {
            Ok(Value::Object(object)) => object,
            Ok(other) => {
                error!("LOGPULL | JSON Parsing Error: expected an object, got {other}");
                return PARSE_ERROR_RESPONSE.to_string();
            }
            Err(e) => {
                error!("LOGPULL | JSON Parsing Error: {e}");
                return PARSE_ERROR_RESPONSE.to_string();
            }
        };

        let Some(api) = object.get("api").and_then(Value::as_str).map(str::to_owned) else {
            error!("LOGPULL | JSON Parsing Error: missing api");
            return PARSE_ERROR_RESPONSE.to_string();
        };

        let response = match api.as_str() {
            LOG_PULL_API => self.target_log_pull_ext(&object).await,
            other => TriggerResponse::new("400", format!("Unknown API: {other}")),
        };
        object.insert("errCode".to_string(), Value::String(response.err_code));
        object.insert("errMsg".to_string(), Value::String(response.err_msg));

        let out = Value::Object(object).to_string();
        debug!("LOGPULL | OUT: {out}");
        out
    }

    async fn target_log_pull_ext(&self, object: &Map<String, Value>) -> TriggerResponse {
        let params = match object
            .get("params")
            .cloned()
            .map(serde_json::from_value::<LogPullParams>)
        {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                error!("LOGPULL | Invalid {LOG_PULL_API} params: {e}");
                return TriggerResponse::new("500", "JSON parsing error");
            }
            None => {
                error!("LOGPULL | Missing {LOG_PULL_API} params");
                return TriggerResponse::new("500", "JSON parsing error");
            }
        };

        if let Some(method) = &params.upload_method {
            info!("LOGPULL | Upload method: {method}");
        }
        self.log_pull
            .run_log_pull(&params.upload_location, &params.upload_token)
            .await
    }
}
