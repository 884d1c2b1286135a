//! JSON-RPC request/response layer
//!
//! Builds `getblocktemplate`, `submitblock` and `generatetoaddress` calls,
//! assigns their correlation ids and decodes reply envelopes. Requests are
//! handed to a [`Fetch`] capability; the transport delivers exactly one
//! completion per request id.

use crate::{Error, Result, ShareStatus};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::net::IpAddr;
use tracing::debug;

pub const GET_BLOCK_TEMPLATE: &str = "getblocktemplate";
pub const SUBMIT_BLOCK: &str = "submitblock";
pub const GENERATE_TO_ADDRESS: &str = "generatetoaddress";

/// Node RPC endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub path: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
            path: "/".to_string(),
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// RPC credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// `Authorization` header value
    pub fn basic_auth(&self) -> String {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.user, self.password));
        format!("Basic {}", token)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A request handed to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Correlation id, equal to the JSON-RPC id in `body`
    pub id: u64,
    /// RPC method, for logging
    pub rpc_method: &'static str,
    /// HTTP method
    pub method: &'static str,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub tls: bool,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

/// What the transport hands back for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    pub ip: Option<IpAddr>,
    pub tls_version: Option<String>,
    pub tls_fingerprint: Option<String>,
}

impl FetchResponse {
    /// Plain 200 response, mostly for tests
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            ip: None,
            tls_version: None,
            tls_fingerprint: None,
        }
    }
}

/// Fire-and-forget request dispatch.
///
/// Implementations must not call back into the client from `fetch`; the
/// completion for `request.id` is delivered later through
/// `SoloClient::on_fetch_complete`.
pub trait Fetch: Send {
    fn fetch(&mut self, request: FetchRequest);
}

/// Builds requests against one endpoint
#[derive(Debug, Clone)]
pub struct RpcClient {
    endpoint: Endpoint,
    auth: Option<String>,
    next_id: u64,
}

impl RpcClient {
    pub fn new(endpoint: Endpoint, credentials: Option<&Credentials>) -> Self {
        Self {
            endpoint,
            auth: credentials.map(Credentials::basic_auth),
            next_id: 1,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Point at a new endpoint. Ids keep counting so late replies from the
    /// old endpoint can never match a new request.
    pub fn reconfigure(&mut self, endpoint: Endpoint, credentials: Option<&Credentials>) {
        self.endpoint = endpoint;
        self.auth = credentials.map(Credentials::basic_auth);
    }

    /// Build a request with the next sequence id
    pub fn request(&mut self, method: &'static str, params: Value) -> FetchRequest {
        let id = self.next_id;
        self.next_id += 1;

        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        })
        .to_string();

        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(auth) = &self.auth {
            headers.push(("Authorization".to_string(), auth.clone()));
        }

        debug!("RPC request {} {}", id, method);

        FetchRequest {
            id,
            rpc_method: method,
            method: "POST",
            host: self.endpoint.host.clone(),
            port: self.endpoint.port,
            path: self.endpoint.path.clone(),
            tls: self.endpoint.tls,
            body,
            headers,
        }
    }

    pub fn get_block_template(&mut self) -> FetchRequest {
        self.request(GET_BLOCK_TEMPLATE, json!([{"rules": ["segwit"]}]))
    }

    pub fn submit_block(&mut self, block_hex: String) -> FetchRequest {
        self.request(SUBMIT_BLOCK, json!({ "hexdata": block_hex }))
    }

    pub fn generate_to_address(&mut self, nblocks: u32, address: &str) -> FetchRequest {
        self.request(
            GENERATE_TO_ADDRESS,
            json!({ "nblocks": nblocks, "address": address }),
        )
    }
}

/// Decoded JSON-RPC reply envelope
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcReply {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    error: Value,
}

impl RpcReply {
    /// Node-reported error, if any
    pub fn error(&self) -> Option<Error> {
        match &self.error {
            Value::Null => None,
            Value::Object(obj) => Some(Error::rpc(
                obj.get("code").and_then(Value::as_i64).unwrap_or(-1),
                obj.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error"),
            )),
            Value::String(message) => Some(Error::rpc(-1, message.clone())),
            other => Some(Error::rpc(-1, other.to_string())),
        }
    }

    /// The result, with a node-reported error taking precedence
    pub fn into_result(self) -> Result<Value> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(self.result),
        }
    }
}

/// Decode a transport response into an RPC reply.
///
/// Non-200 responses are errors; when their body still carries an RPC
/// error object, that error is returned instead of the bare status.
pub fn parse_reply(response: &FetchResponse) -> Result<RpcReply> {
    if response.status != 200 {
        if let Ok(reply) = serde_json::from_str::<RpcReply>(&response.body) {
            if let Some(err) = reply.error() {
                return Err(err);
            }
        }
        return Err(Error::http_status(response.status));
    }

    Ok(serde_json::from_str(&response.body)?)
}

/// Interpret a `submitblock` result
pub fn submit_outcome(result: &Value) -> ShareStatus {
    match result {
        Value::Null => ShareStatus::Accepted,
        Value::String(s) if s.is_empty() || s == "accepted" || s == "inconclusive" => {
            ShareStatus::Accepted
        }
        Value::String(reason) => ShareStatus::Rejected(reason.clone()),
        other => ShareStatus::Rejected(other.to_string()),
    }
}
