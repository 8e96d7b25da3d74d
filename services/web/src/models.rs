//! Wire models for error bodies and request logging.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Body returned for every failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonWebErrorResponse {
    pub status_code: u16,
    pub message: String,
}

/// Request as captured by the request logger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestModel {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub path: String,
    /// Including the leading `?`, empty when there is no query
    pub query_string: String,
    pub remote_ip_address: Option<String>,
    pub body: Option<String>,
}

/// Response as captured by the request logger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseModel {
    pub status_code: u16,
    pub body: Option<String>,
}

macro_rules! display_as_json {
    ($($model:ty),*) => {
        $(
            impl fmt::Display for $model {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                    f.write_str(&json)
                }
            }
        )*
    };
}

display_as_json!(JsonWebErrorResponse, RequestModel, ResponseModel);
