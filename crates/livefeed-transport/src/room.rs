//! Room discovery: handle → room id.
//!
//! The room page embeds the room id in an undocumented data blob whose
//! encoding has changed several times, so several patterns are tried in
//! order.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use livefeed_ipc::RawSettings;

use crate::error::TransportError;
use crate::TransportResult;

const ROOM_ID_SOURCES: &[&str] = &[
    // Plain JSON in a script tag.
    r#""roomId"\s*:\s*"(\d+)""#,
    // JSON embedded as an escaped string.
    r#"\\"roomId\\"\s*:\s*\\"(\d+)\\""#,
    // JSON in an HTML attribute.
    r#"roomId&quot;:&quot;(\d+)&quot;"#,
    r#""room_id"\s*:\s*"?(\d+)"#,
    r#""liveRoomId"\s*:\s*"?(\d+)"#,
    // Deep link / query string.
    r#"room_id=(\d+)"#,
];

static ROOM_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ROOM_ID_SOURCES
        .iter()
        .map(|source| Regex::new(source).expect("room id pattern is valid"))
        .collect()
});

/// Extract the first non-zero room id from a room page body.
pub fn extract_room_id(body: &str) -> Option<String> {
    ROOM_ID_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures_iter(body)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .find(|id| !id.trim_start_matches('0').is_empty())
            .map(str::to_string)
    })
}

/// Resolves handles to room ids over HTTP.
pub struct RoomResolver {
    client: reqwest::Client,
    settings: RawSettings,
}

impl RoomResolver {
    /// Build a resolver with the configured User-Agent, headers and timeout.
    pub fn new(settings: &RawSettings) -> TransportResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &settings.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, "skipping invalid room page header"),
            }
        }

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .timeout(settings.resolve_timeout())
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }

    /// Fetch the room page for `handle` and extract its room id.
    ///
    /// Returns [`TransportError::Cancelled`] as soon as `cancel` fires; the
    /// in-flight request is dropped.
    #[instrument(name = "resolve_room", skip(self, cancel))]
    pub async fn resolve(&self, handle: &str, cancel: &CancellationToken) -> TransportResult<String> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let url = self.settings.room_page_for(handle);
        debug!(%url, "Fetching room page");

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = self.fetch(&url) => result?,
        };

        match extract_room_id(&body) {
            Some(room_id) => {
                debug!(%room_id, "Room resolved");
                Ok(room_id)
            }
            None => Err(TransportError::RoomNotFound(format!(
                "no room id for @{handle}; the account is probably not live"
            ))),
        }
    }

    async fn fetch(&self, url: &str) -> TransportResult<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(TransportError::RoomNotFound(format!("room page {url} returned 404")));
        }
        if !status.is_success() {
            return Err(TransportError::Http(format!("room page {url} returned {status}")));
        }

        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_for(server: &MockServer) -> RawSettings {
        RawSettings {
            room_page_url: format!("{}/@{{handle}}/live", server.uri()),
            ..RawSettings::default()
        }
    }

    #[test]
    fn test_extract_plain_json() {
        let body = r#"<script id="SIGI_STATE">{"LiveRoom":{"roomId":"7301234567890"}}</script>"#;
        assert_eq!(extract_room_id(body).as_deref(), Some("7301234567890"));
    }

    #[test]
    fn test_extract_escaped_and_entity_encodings() {
        let escaped = r#"self.__next_f.push([1,"{\"roomId\":\"7302\"}"])"#;
        assert_eq!(extract_room_id(escaped).as_deref(), Some("7302"));

        let entity = r#"<div data-state="{&quot;roomId&quot;:&quot;7303&quot;}">"#;
        assert_eq!(extract_room_id(entity).as_deref(), Some("7303"));

        let query = r#"<a href="snssdk1233://webcast_room?room_id=7304&enter_from=h5">"#;
        assert_eq!(extract_room_id(query).as_deref(), Some("7304"));
    }

    #[test]
    fn test_zero_room_id_means_offline() {
        assert_eq!(extract_room_id(r#"{"roomId":"0"}"#), None);
        assert_eq!(
            extract_room_id(r#"{"roomId":"0","liveRoomId":"7305"}"#).as_deref(),
            Some("7305")
        );
        assert_eq!(extract_room_id("<html>nothing here</html>"), None);
    }

    #[tokio::test]
    async fn test_resolve_sends_configured_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/@someone/live"))
            .and(header("referer", "https://www.tiktok.com/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"roomId":"42"}"#))
            .mount(&server)
            .await;

        let resolver = RoomResolver::new(&settings_for(&server)).unwrap();
        let room_id = resolver
            .resolve("someone", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(room_id, "42");
    }

    #[tokio::test]
    async fn test_resolve_offline_page_is_room_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/@someone/live"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>offline</html>"))
            .mount(&server)
            .await;

        let resolver = RoomResolver::new(&settings_for(&server)).unwrap();
        let err = resolver
            .resolve("someone", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_server_error_is_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let resolver = RoomResolver::new(&settings_for(&server)).unwrap();
        let err = resolver
            .resolve("someone", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Http(_)));
    }

    #[tokio::test]
    async fn test_resolve_cancelled_before_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"roomId":"42"}"#))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let resolver = RoomResolver::new(&settings_for(&server)).unwrap();
        let err = resolver.resolve("someone", &cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }

    #[tokio::test]
    async fn test_resolve_cancelled_mid_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"roomId":"42"}"#)
                    .set_delay(std::time::Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let resolver = RoomResolver::new(&settings_for(&server)).unwrap();
        let started = std::time::Instant::now();
        let err = resolver.resolve("someone", &cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }
}
