//! XML-RPC client over HTTP

use super::xmlrpc::{self, RpcValue};
use devq_shared::DriverError;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

/// One XML-RPC endpoint on the controller
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
}

impl RpcClient {
    /// Create a client for `http://host:port{path}`
    pub fn new(host: &str, port: u16, path: &str, timeout: Duration) -> Result<Self, DriverError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        Ok(Self {
            http,
            url: format!("http://{}:{}{}", host, port, path),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Invoke a method and return its decoded reply
    pub async fn call(&self, method: &str, params: &[RpcValue]) -> Result<RpcValue, DriverError> {
        let rpc_error = |reason: String| DriverError::Rpc {
            method: method.to_string(),
            reason,
        };

        debug!("[RPC] {} {}({:?})", self.url, method, params);

        let response = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "text/xml")
            .body(xmlrpc::encode_call(method, params))
            .send()
            .await
            .map_err(|e| rpc_error(e.to_string()))?
            .error_for_status()
            .map_err(|e| rpc_error(e.to_string()))?;

        let body = response.text().await.map_err(|e| rpc_error(e.to_string()))?;
        let value = xmlrpc::decode_response(&body).map_err(|e| rpc_error(e.to_string()))?;

        debug!("[RPC] {} -> {:?}", method, value);
        Ok(value)
    }

    /// Invoke a method whose reply carries a status code
    pub async fn call_status(&self, method: &str, params: &[RpcValue]) -> Result<i64, DriverError> {
        let value = self.call(method, params).await?;
        value.status_code().ok_or_else(|| DriverError::Rpc {
            method: method.to_string(),
            reason: format!("no status code in reply {:?}", value),
        })
    }

    /// Invoke a method that must return code 0
    pub async fn expect_ok(&self, method: &str, params: &[RpcValue]) -> Result<(), DriverError> {
        match self.call_status(method, params).await? {
            0 => Ok(()),
            code => Err(DriverError::Status {
                method: method.to_string(),
                code,
            }),
        }
    }
}
