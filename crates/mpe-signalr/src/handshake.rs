//! SignalR control endpoints: negotiate, start, abort, and the socket URL.
//!
//! All control calls are HTTP GETs carrying the challenge-solver cookie and
//! the effective user-agent. The socket upgrade reuses the same headers.

use crate::config::ConnectionConfig;
use crate::credentials::Credentials;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{SignalrError, SignalrResult};
use crate::wire::{self, CLIENT_PROTOCOL};
use chrono::Utc;
use reqwest::header;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, warn};
use url::Url;

/// Socket timeout on the control requests.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Handshake phases, used for error attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    Negotiate,
    Connect,
    Start,
}

impl std::fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Negotiate => write!(f, "negotiate"),
            Self::Connect => write!(f, "connect"),
            Self::Start => write!(f, "start"),
        }
    }
}

/// HTTP client for the control endpoints of one connection.
pub struct ControlEndpoints {
    http: reqwest::Client,
    base_https: String,
    base_wss: String,
    hub: String,
    cookie: String,
    user_agent: String,
}

impl ControlEndpoints {
    pub fn new(config: &ConnectionConfig, credentials: &Credentials) -> SignalrResult<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_https: config.base_https.trim_end_matches('/').to_string(),
            base_wss: config.base_wss.trim_end_matches('/').to_string(),
            hub: config.hub.clone(),
            cookie: credentials.cookie.clone(),
            user_agent: config.effective_user_agent(credentials),
        })
    }

    pub fn hub(&self) -> &str {
        &self.hub
    }

    /// GET `<baseHttps>/negotiate` and parse the connection descriptor.
    pub async fn negotiate(&self) -> SignalrResult<ConnectionDescriptor> {
        let url = self.control_url("negotiate", "serverSentEvents", None)?;
        debug!(%url, "negotiate");
        let response = self.get(url).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| SignalrError::MalformedNegotiate(e.to_string()))
    }

    /// GET `<baseHttps>/start`. The body is ignored; 200 means started.
    pub async fn start(&self, connection_token: &str) -> SignalrResult<()> {
        let url = self.control_url("start", "webSockets", Some(connection_token))?;
        debug!(%url, "start");
        self.get(url).await?;
        Ok(())
    }

    /// Best-effort GET `<baseHttps>/abort`. Failures are logged and
    /// swallowed; teardown proceeds either way.
    pub async fn abort(&self, connection_token: &str) {
        match self.control_url("abort", "webSockets", Some(connection_token)) {
            Ok(url) => {
                debug!(%url, "abort");
                if let Err(error) = self.get(url).await {
                    warn!(%error, "abort request failed");
                }
            }
            Err(error) => warn!(%error, "abort url construction failed"),
        }
    }

    /// Socket URL: `<baseWss>/connect?...&tid=<currentMillis>`.
    pub fn connect_url(&self, descriptor: &ConnectionDescriptor) -> SignalrResult<Url> {
        let mut url = Url::parse(&format!("{}/connect", self.base_wss))?;
        url.query_pairs_mut()
            .append_pair("clientProtocol", &descriptor.protocol_version)
            .append_pair("transport", "webSockets")
            .append_pair("connectionToken", &descriptor.connection_token)
            .append_pair("connectionData", &wire::connection_data(&self.hub))
            .append_pair("tid", &Utc::now().timestamp_millis().to_string());
        Ok(url)
    }

    /// Upgrade request for the socket URL, with credential headers applied.
    pub fn client_request(&self, url: &Url) -> SignalrResult<Request> {
        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|e| SignalrError::InvalidCredential(e.to_string()))?,
        );
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&self.cookie)
                .map_err(|e| SignalrError::InvalidCredential(e.to_string()))?,
        );
        Ok(request)
    }

    fn control_url(
        &self,
        endpoint: &str,
        transport: &str,
        connection_token: Option<&str>,
    ) -> SignalrResult<Url> {
        let mut url = Url::parse(&format!("{}/{}", self.base_https, endpoint))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("clientProtocol", CLIENT_PROTOCOL);
            query.append_pair("transport", transport);
            if let Some(token) = connection_token {
                query.append_pair("connectionToken", token);
            }
            query.append_pair("connectionData", &wire::connection_data(&self.hub));
        }
        Ok(url)
    }

    async fn get(&self, url: Url) -> SignalrResult<reqwest::Response> {
        let response = self
            .http
            .get(url)
            .header(header::USER_AGENT, &self.user_agent)
            .header(header::COOKIE, &self.cookie)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignalrError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> ControlEndpoints {
        let config = ConnectionConfig {
            base_https: String::from("https://host/signalr"),
            base_wss: String::from("wss://host/signalr"),
            ..ConnectionConfig::default()
        };
        let credentials = Credentials::new("cf=abc", "Mozilla/5.0");
        ControlEndpoints::new(&config, &credentials).unwrap()
    }

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            connection_id: String::from("abc"),
            connection_token: String::from("tok+en"),
            protocol_version: String::from("1.5"),
            transport_connect_timeout: 5.0,
            disconnect_timeout: 30.0,
            keep_alive_timeout: Some(20.0),
        }
    }

    #[test]
    fn test_negotiate_url_shape() {
        let url = endpoints()
            .control_url("negotiate", "serverSentEvents", None)
            .unwrap();
        assert_eq!(url.path(), "/signalr/negotiate");
        let query = url.query().unwrap();
        assert!(query.starts_with("clientProtocol=1.5&transport=serverSentEvents"));
        assert!(query.contains("connectionData="));
        assert!(!query.contains("connectionToken"));
    }

    #[test]
    fn test_start_url_carries_token() {
        let url = endpoints()
            .control_url("start", "webSockets", Some("tok+en"))
            .unwrap();
        assert_eq!(url.path(), "/signalr/start");
        let query = url.query().unwrap();
        assert!(query.contains("transport=webSockets"));
        // The token must survive url-encoding round trips.
        let token = url
            .query_pairs()
            .find(|(key, _)| key == "connectionToken")
            .map(|(_, value)| value.into_owned());
        assert_eq!(token.as_deref(), Some("tok+en"));
    }

    #[test]
    fn test_connect_url_shape() {
        let url = endpoints().connect_url(&descriptor()).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/signalr/connect");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs[0], ("clientProtocol".into(), "1.5".into()));
        assert_eq!(pairs[1], ("transport".into(), "webSockets".into()));
        assert_eq!(pairs[2], ("connectionToken".into(), "tok+en".into()));
        assert_eq!(pairs[3].0, "connectionData");
        assert_eq!(pairs[3].1, r#"[{"name":"corehub"}]"#);
        assert_eq!(pairs[4].0, "tid");
        assert!(pairs[4].1.parse::<i64>().is_ok());
    }

    #[test]
    fn test_client_request_carries_credentials() {
        let eps = endpoints();
        let url = eps.connect_url(&descriptor()).unwrap();
        let request = eps.client_request(&url).unwrap();
        assert_eq!(
            request.headers().get(header::COOKIE).unwrap(),
            &HeaderValue::from_static("cf=abc")
        );
        assert_eq!(
            request.headers().get(header::USER_AGENT).unwrap(),
            &HeaderValue::from_static("MPE")
        );
    }
}
