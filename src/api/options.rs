use serde::{Deserialize, Serialize};

/// Default delivery mailbox capacity, in messages.
const DEFAULT_DELIVERY_CAPACITY: usize = 64;

/// Connection options for a [`Subscriber`](crate::Subscriber).
///
/// Everything the CONNECT handshake needs: where to dial, how to
/// authenticate, and the protocol toggles the server honors. The relevant
/// fields are passed through verbatim into the CONNECT JSON payload.
///
/// # Examples
///
/// ```
/// use gnat::ConnectOpts;
///
/// let opts = ConnectOpts::new("demo.nats.io", 4222)
///     .with_name("ticker")
///     .with_token("s3cr3t")
///     .with_verbose(false);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectOpts {
    host: String,
    port: u16,
    tls_required: bool,
    auth_token: Option<String>,
    user: Option<String>,
    pass: Option<String>,
    name: Option<String>,
    verbose: bool,
    pedantic: bool,
    delivery_capacity: usize,
}

impl Default for ConnectOpts {
    fn default() -> Self {
        Self::new("127.0.0.1", 4222)
    }
}

impl ConnectOpts {
    /// Creates options targeting `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls_required: false,
            auth_token: None,
            user: None,
            pass: None,
            name: None,
            verbose: false,
            pedantic: false,
            delivery_capacity: DEFAULT_DELIVERY_CAPACITY,
        }
    }

    /// Requests TLS in the CONNECT payload.
    ///
    /// The handshake itself is the transport's concern; this flag only
    /// announces the client's intent to the server.
    #[must_use]
    pub fn with_tls_required(mut self, tls_required: bool) -> Self {
        self.tls_required = tls_required;
        self
    }

    /// Authenticates with a token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Authenticates with a username and password.
    #[must_use]
    pub fn with_user_pass(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.pass = Some(pass.into());
        self
    }

    /// Sets the client name reported to the server.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Asks the server to acknowledge every operation with +OK.
    ///
    /// Acknowledgements arrive as ordinary messages of kind
    /// [`Kind::Ok`](crate::Kind::Ok).
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Asks the server for stricter protocol checking.
    #[must_use]
    pub fn with_pedantic(mut self, pedantic: bool) -> Self {
        self.pedantic = pedantic;
        self
    }

    /// Bounds the delivery mailbox to `capacity` undelivered messages.
    ///
    /// A full mailbox blocks the reader task, which transitively applies
    /// TCP-level backpressure to the server. Default: 64.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_delivery_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "delivery capacity must be non-zero");
        self.delivery_capacity = capacity;
        self
    }

    pub(crate) fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn delivery_capacity(&self) -> usize {
        self.delivery_capacity
    }

    /// Renders the CONNECT JSON payload.
    pub(crate) fn connect_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&ConnectPayload {
            verbose: self.verbose,
            pedantic: self.pedantic,
            tls_required: self.tls_required,
            auth_token: self.auth_token.as_deref(),
            user: self.user.as_deref(),
            pass: self.pass.as_deref(),
            name: self.name.as_deref(),
            lang: "rust",
            version: env!("CARGO_PKG_VERSION"),
            headers: true,
        })
    }
}

#[derive(Serialize)]
struct ConnectPayload<'a> {
    verbose: bool,
    pedantic: bool,
    tls_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pass: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    lang: &'a str,
    version: &'a str,
    headers: bool,
}

/// The parsed JSON document of the server's opening INFO frame.
///
/// Fields the server omits fall back to their defaults; unknown fields are
/// ignored, so newer servers remain compatible.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    /// Unique identifier of the server instance.
    #[serde(default)]
    pub server_id: String,
    /// Configured server name.
    #[serde(default)]
    pub server_name: String,
    /// Server version string.
    #[serde(default)]
    pub version: String,
    /// Protocol level spoken by the server.
    #[serde(default)]
    pub proto: i32,
    /// Largest payload the server accepts, in bytes.
    #[serde(default)]
    pub max_payload: usize,
    /// Whether the server requires TLS.
    #[serde(default)]
    pub tls_required: bool,
    /// Whether the server supports message headers.
    #[serde(default)]
    pub headers: bool,
    /// Whether the server requires authentication.
    #[serde(default)]
    pub auth_required: bool,
    /// Other servers of the cluster the client may connect to.
    #[serde(default)]
    pub connect_urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_json_omits_absent_credentials() {
        let json = ConnectOpts::new("localhost", 4222).connect_json().unwrap();
        assert!(json.contains("\"verbose\":false"));
        assert!(json.contains("\"lang\":\"rust\""));
        assert!(!json.contains("auth_token"));
        assert!(!json.contains("user"));
    }

    #[test]
    fn connect_json_carries_credentials() {
        let json = ConnectOpts::new("localhost", 4222)
            .with_token("tkn")
            .with_name("worker-7")
            .with_verbose(true)
            .connect_json()
            .unwrap();
        assert!(json.contains("\"auth_token\":\"tkn\""));
        assert!(json.contains("\"name\":\"worker-7\""));
        assert!(json.contains("\"verbose\":true"));
    }

    #[test]
    fn server_info_tolerates_sparse_documents() {
        let info: ServerInfo = serde_json::from_str("{}").unwrap();
        assert_eq!(info.proto, 0);
        assert!(!info.tls_required);

        let info: ServerInfo = serde_json::from_str(
            "{\"server_id\":\"a1\",\"max_payload\":1048576,\"headers\":true,\"future_field\":1}",
        )
        .unwrap();
        assert_eq!(info.server_id, "a1");
        assert_eq!(info.max_payload, 1_048_576);
        assert!(info.headers);
    }
}
