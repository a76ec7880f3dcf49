//! Server-Sent Events transport.
//!
//! Each channel is a long-lived `GET` against its endpoint with
//! `Accept: text/event-stream`. The bearer credential travels as the `token`
//! query parameter because the push endpoints cannot rely on custom headers.

use std::sync::Arc;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use futures::future::BoxFuture;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::debug;

use crate::channel::ChannelKey;
use crate::error::ChannelError;
use crate::transport::{CredentialSource, FrameStream, PushTransport};

pub struct SseTransport {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl SseTransport {
    pub fn new(base_url: impl Into<String>, credentials: impl CredentialSource) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, credentials)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        credentials: impl CredentialSource,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: Arc::new(credentials),
        }
    }

    pub fn url_for(&self, key: &ChannelKey) -> String {
        format!("{}{}", self.base_url, key.endpoint_path())
    }

    /// The stream request for one connection attempt. The credential is read
    /// here, per attempt, since it may have rotated since the last connect.
    fn request(&self, key: &ChannelKey) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(self.url_for(key))
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        match self.credentials.bearer() {
            Some(token) => request.query(&[("token", token)]),
            None => request,
        }
    }
}

impl PushTransport for SseTransport {
    fn connect<'a>(
        &'a self,
        key: &'a ChannelKey,
    ) -> BoxFuture<'a, Result<FrameStream, ChannelError>> {
        Box::pin(async move {
            let url = self.url_for(key);
            let response = self
                .request(key)
                .send()
                .await
                .map_err(ChannelError::transport)?;
            let status = response.status();
            if !status.is_success() {
                return Err(ChannelError::Transport(format!(
                    "{} returned {}",
                    url, status
                )));
            }

            debug!(channel = %key, url = %url, "event stream established");

            let frames = response
                .bytes_stream()
                .eventsource()
                .filter_map(|event| async move {
                    match event {
                        // keep-alive
                        Ok(event) if event.data.trim().is_empty() => None,
                        Ok(event) => Some(Ok(event.data)),
                        Err(e) => Some(Err(ChannelError::transport(e))),
                    }
                });

            Ok(frames.boxed())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{SharedCredential, StaticCredential};

    #[test]
    fn url_joins_base_and_endpoint() {
        let transport = SseTransport::new("http://localhost:8000/", StaticCredential::new(None));
        assert_eq!(
            transport.url_for(&ChannelKey::Gps),
            "http://localhost:8000/api/gps/stream"
        );
        assert_eq!(
            transport.url_for(&ChannelKey::conversation("c9")),
            "http://localhost:8000/api/ai/conversations/c9/stream"
        );
    }

    fn token_param(transport: &SseTransport, key: &ChannelKey) -> Option<String> {
        let request = transport.request(key).build().unwrap();
        assert_eq!(request.headers()[ACCEPT], "text/event-stream");
        request
            .url()
            .query_pairs()
            .find(|(name, _)| name == "token")
            .map(|(_, value)| value.into_owned())
    }

    #[test]
    fn each_request_carries_the_current_token() {
        let credential = SharedCredential::new(Some("token-1".into()));
        let transport = SseTransport::new("http://localhost:8000", credential.clone());
        let key = ChannelKey::conversation("c9");

        assert_eq!(token_param(&transport, &key).as_deref(), Some("token-1"));

        credential.rotate(Some("token-2".into()));
        let request = transport.request(&key).build().unwrap();
        assert_eq!(
            request.url().as_str(),
            "http://localhost:8000/api/ai/conversations/c9/stream?token=token-2"
        );

        credential.rotate(None);
        assert_eq!(token_param(&transport, &key), None);
        assert_eq!(
            transport.request(&key).build().unwrap().url().query(),
            None
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let transport = SseTransport::new("http://127.0.0.1:1", StaticCredential::new(None));
        match transport.connect(&ChannelKey::Gps).await {
            Err(err) => assert!(err.is_transient()),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
