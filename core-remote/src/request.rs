//! Request specifications and URL construction.
//!
//! A [`RequestSpec`] names one logical operation: an endpoint plus its query
//! parameters. [`ServerEndpoint`] turns it into a concrete URL, appending the
//! authentication parameters every call carries:
//!
//! ```text
//! <server>/rest/<endpoint>.view?u=<user>&p=enc:<hex>&v=<version>&c=<client>&f=json&<params>
//! ```

use core_runtime::config::CoreConfig;
use std::fmt;
use std::time::Duration;

/// One logical request against the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub endpoint: String,
    /// Ordered, and a name may repeat (`id=1&id=2`).
    pub params: Vec<(String, String)>,
    /// Overrides the configured initial read timeout.
    pub read_timeout: Option<Duration>,
    /// Byte offset for a `Range: bytes=<offset>-` header. Zero sends none.
    pub range_offset: u64,
}

impl RequestSpec {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: Vec::new(),
            read_timeout: None,
            range_offset: 0,
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    pub fn param_opt<T: ToString>(self, name: impl Into<String>, value: Option<T>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn range_from(mut self, offset: u64) -> Self {
        self.range_offset = offset;
        self
    }

    /// Header value for the resume offset, if any.
    pub fn range_header(&self) -> Option<String> {
        (self.range_offset > 0).then(|| format!("bytes={}-", self.range_offset))
    }
}

/// Where requests go and who sends them.
#[derive(Clone)]
pub struct ServerEndpoint {
    base_url: String,
    username: String,
    password_param: String,
    protocol_version: String,
    client_id: String,
}

impl ServerEndpoint {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: &str,
        protocol_version: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password_param: encode_password(password),
            protocol_version: protocol_version.into(),
            client_id: client_id.into(),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(
            config.server.base_url.clone(),
            config.server.username.clone(),
            &config.server.password,
            config.protocol_version.clone(),
            config.client_id.clone(),
        )
    }

    /// Stable identity of the server account, used in cache fingerprints.
    pub fn identity(&self) -> String {
        format!("{}|{}", self.base_url, self.username)
    }

    pub fn url_for(&self, spec: &RequestSpec) -> String {
        let mut url = format!(
            "{}/rest/{}.view?u={}&p={}&v={}&c={}&f=json",
            self.base_url,
            spec.endpoint,
            urlencoding::encode(&self.username),
            self.password_param,
            urlencoding::encode(&self.protocol_version),
            urlencoding::encode(&self.client_id),
        );
        for (name, value) in &spec.params {
            url.push('&');
            url.push_str(&urlencoding::encode(name));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }
}

impl fmt::Debug for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEndpoint")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("protocol_version", &self.protocol_version)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// `enc:` followed by the hex of the UTF-8 password.
pub fn encode_password(password: &str) -> String {
    format!("enc:{}", hex::encode(password.as_bytes()))
}
