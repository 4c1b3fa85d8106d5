//! # XML-RPC Transport
//!
//! Sends calls to the per-service XML-RPC endpoints of the server, using the
//! [`super::codec`] module to transcode the JSON arguments.
//!
//! ## Endpoints
//!
//! The URL layout depends on the server version:
//!
//! * `< 6.1`: `/xmlrpc/<service>`
//! * `6.1` to `7.0`: `/openerp/xmlrpc/1/<service>`
//! * `>= 8.0`, or unknown: `/xmlrpc/2/<service>`
use super::{Transport, TransportError, codec};
use crate::tools::Version;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct XmlRpcTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl XmlRpcTransport {
    pub fn new(
        client: reqwest::Client,
        root_url: &str,
        server_version: Option<&str>,
        timeout: Duration,
    ) -> Self {
        let base_url = format!("{}{}", root_url, endpoint_prefix(server_version));
        Self {
            client,
            base_url,
            timeout,
        }
    }

    /// The full URL the calls to `service` are posted to.
    pub fn service_url(&self, service: &str) -> String {
        format!("{}/{}", self.base_url, service)
    }
}

fn endpoint_prefix(server_version: Option<&str>) -> &'static str {
    let Some(version) = server_version.and_then(Version::parse) else {
        return "/xmlrpc/2";
    };

    if version < Version::new(&[6, 1]) {
        "/xmlrpc"
    } else if version < Version::new(&[8]) {
        "/openerp/xmlrpc/1"
    } else {
        "/xmlrpc/2"
    }
}

impl Transport for XmlRpcTransport {
    async fn call(
        &mut self,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, TransportError> {
        let url = self.service_url(service);
        let body = codec::encode_call(method, &args);

        debug!(%url, method, "xmlrpc call");

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "text/xml")
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;

        codec::decode_response(&text)
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_depends_on_version() {
        assert_eq!(endpoint_prefix(None), "/xmlrpc/2");
        assert_eq!(endpoint_prefix(Some("5.0.16")), "/xmlrpc");
        assert_eq!(endpoint_prefix(Some("6.0")), "/xmlrpc");
        assert_eq!(endpoint_prefix(Some("6.1-20120530")), "/openerp/xmlrpc/1");
        assert_eq!(endpoint_prefix(Some("7.0")), "/openerp/xmlrpc/1");
        assert_eq!(endpoint_prefix(Some("8.0")), "/xmlrpc/2");
        assert_eq!(endpoint_prefix(Some("saas~17.2")), "/xmlrpc/2");
    }
}
