use bytes::Bytes;
use metabase_error::error::{CardError, RetryError, TransportError};
use metabase_settings::config::{ClientSettings, RetrySettings};
use metabase_types::{Filter, Format};
use metabase_utils::retry::with_retry;
use reqwest::{Client, StatusCode};
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const PARAMETERS_QUERY_KEY: &str = "parameters";

#[derive(Debug, Clone)]
pub enum Routes {
    PublicCardQuery,
}

impl Routes {
    pub fn as_str(&self) -> &str {
        match self {
            Routes::PublicCardQuery => "api/public/card",
        }
    }

    /// Path of the public export endpoint for `uuid` in `format`
    pub fn card_query_path(uuid: &str, format: Format) -> String {
        format!(
            "{}/{}/query/{}",
            Routes::PublicCardQuery.as_str(),
            uuid,
            format
        )
    }
}

/// Create a new HTTP client with the configured request timeout
pub fn build_http_client(settings: &ClientSettings) -> Result<Client, CardError> {
    let client = Client::builder().timeout(settings.timeout).build()?;
    Ok(client)
}

/// Client for the public card api. Holds no per-call state and can be cloned
/// and shared freely.
#[derive(Debug, Clone)]
pub struct MetabaseClient {
    client: Client,
    base_url: String,
}

impl MetabaseClient {
    /// Create a client for `base_url`. Without a transport, one is built from
    /// the default settings (15 second timeout).
    pub fn new(base_url: &str, client: Option<Client>) -> Result<Self, CardError> {
        let client = match client {
            Some(client) => client,
            None => build_http_client(&ClientSettings::default())?,
        };

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self, CardError> {
        let client = build_http_client(settings)?;
        Self::new(&settings.base_url, Some(client))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full endpoint url, without the query string
    pub fn card_query_url(&self, uuid: &str, format: Format) -> String {
        format!("{}/{}", self.base_url, Routes::card_query_path(uuid, format))
    }

    /// Fetch the export of a public card.
    ///
    /// Issues exactly one GET request. Non 200 responses are returned as
    /// `CardError::UpstreamError` with the response body; cancelling `cancel`
    /// aborts the request or the body read.
    ///
    /// # Arguments
    ///
    /// * `cancel` - Token that aborts the request
    /// * `uuid` - Public card uuid, passed through unchecked
    /// * `format` - Export format, either a `Format` or its token ("json", "csv", "xlsx")
    /// * `filters` - Parameters sent as a json array in the `parameters` query
    ///
    /// # Returns
    ///
    /// * `Bytes` - The raw export body
    pub async fn card_query(
        &self,
        cancel: &CancellationToken,
        uuid: &str,
        format: impl AsRef<str>,
        filters: &[Filter],
    ) -> Result<Bytes, CardError> {
        let format = Format::from_str(format.as_ref())?;

        let parameters = serde_json::to_string(filters).map_err(CardError::SerializationError)?;
        let url = self.card_query_url(uuid, format);

        debug!(
            url = %url,
            filters = filters.len(),
            "Requesting public card export"
        );

        let request = self
            .client
            .get(url)
            .query(&[(PARAMETERS_QUERY_KEY, parameters.as_str())]);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CardError::from(TransportError::Cancelled)),
            result = Self::execute(request) => result,
        }
    }

    async fn execute(request: reqwest::RequestBuilder) -> Result<Bytes, CardError> {
        let response = request.send().await?;
        let status = response.status();

        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            debug!(status = %status, "Public card request rejected");
            return Err(CardError::UpstreamError { status, body });
        }

        Ok(response.bytes().await?)
    }

    /// `card_query` wrapped in the bounded retry helper.
    ///
    /// Every failure, including an upstream rejection, counts as a failed
    /// attempt. Takes a parsed `Format` so that an invalid token is rejected
    /// by the caller before any attempt is made.
    pub async fn card_query_with_retry(
        &self,
        cancel: &CancellationToken,
        uuid: &str,
        format: Format,
        filters: &[Filter],
        retry: &RetrySettings,
    ) -> Result<Bytes, RetryError<CardError>> {
        with_retry(cancel, retry.max_attempts, retry.delay, move || {
            self.card_query(cancel, uuid, format, filters)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metabase_types::{filters_from_record, new_category_filter};
    use mockito::{Matcher, Server, ServerGuard};
    use serde::Serialize;
    use std::time::Duration;
    use tokio::net::TcpListener;

    const CARD_UUID: &str = "4a3f0f6e-9c57-4cb4-9d57-0f2d3a8c1e11";

    async fn setup_server() -> (ServerGuard, String) {
        let server = Server::new_async().await;
        let server_url = server.url();
        (server, server_url)
    }

    fn card_path(format: &str) -> String {
        format!("/api/public/card/{}/query/{}", CARD_UUID, format)
    }

    #[tokio::test]
    async fn test_card_query_returns_raw_body() {
        let (mut server, server_url) = setup_server().await;
        let client = MetabaseClient::new(&server_url, None).unwrap();

        let filters = vec![new_category_filter("start_date", "2024-01-01")];
        let expected_parameters = serde_json::to_string(&filters).unwrap();

        let mock = server
            .mock("GET", card_path("csv").as_str())
            .match_query(Matcher::UrlEncoded(
                "parameters".to_string(),
                expected_parameters,
            ))
            .with_status(200)
            .with_header("content-type", "text/csv")
            .with_body("region,total\nemea,10\n")
            .expect(1)
            .create_async()
            .await;

        let body = client
            .card_query(&CancellationToken::new(), CARD_UUID, Format::Csv, &filters)
            .await
            .unwrap();

        assert_eq!(body.as_ref(), b"region,total\nemea,10\n");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_card_query_without_filters_sends_empty_array() {
        let (mut server, server_url) = setup_server().await;
        let client = MetabaseClient::new(&format!("{}//", server_url), None).unwrap();
        assert_eq!(client.base_url(), server_url);

        let mock = server
            .mock("GET", card_path("json").as_str())
            .match_query(Matcher::UrlEncoded(
                "parameters".to_string(),
                "[]".to_string(),
            ))
            .with_status(200)
            .with_body(r#"[{"a":1}]"#)
            .expect(1)
            .create_async()
            .await;

        let body = client
            .card_query(&CancellationToken::new(), CARD_UUID, "json", &[])
            .await
            .unwrap();

        assert_eq!(body.as_ref(), br#"[{"a":1}]"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_card_query_with_record_filters() {
        #[derive(Serialize)]
        struct Params {
            region: String,
            #[serde(rename = "yr")]
            year: i32,
        }

        let (mut server, server_url) = setup_server().await;
        let client = MetabaseClient::new(&server_url, None).unwrap();

        let filters = filters_from_record(&Params {
            region: "emea".to_string(),
            year: 2024,
        })
        .unwrap();

        let mock = server
            .mock("GET", card_path("xlsx").as_str())
            .match_query(Matcher::UrlEncoded(
                "parameters".to_string(),
                r#"[{"type":"category","value":"emea","target":["variable",["template-tag","region"]]},{"type":"category","value":2024,"target":["variable",["template-tag","yr"]]}]"#.to_string(),
            ))
            .with_status(200)
            .with_body(vec![0x50, 0x4b, 0x03, 0x04])
            .expect(1)
            .create_async()
            .await;

        let body = client
            .card_query(&CancellationToken::new(), CARD_UUID, Format::Xlsx, &filters)
            .await
            .unwrap();

        assert_eq!(body.as_ref(), &[0x50, 0x4b, 0x03, 0x04]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_card_query_upstream_error() {
        let (mut server, server_url) = setup_server().await;
        let client = MetabaseClient::new(&server_url, None).unwrap();

        let mock = server
            .mock("GET", card_path("json").as_str())
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body("not found")
            .expect(1)
            .create_async()
            .await;

        let err = client
            .card_query(&CancellationToken::new(), CARD_UUID, Format::Json, &[])
            .await
            .unwrap_err();

        match &err {
            CardError::UpstreamError { status, body } => {
                assert_eq!(*status, StatusCode::NOT_FOUND);
                assert_eq!(body, "not found");
            }
            other => panic!("expected upstream error, got {:?}", other),
        }

        let msg = err.to_string();
        assert!(msg.contains("404"));
        assert!(msg.contains("not found"));

        // exactly one request, no internal retry
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalid_format_sends_nothing() {
        let (mut server, server_url) = setup_server().await;
        let client = MetabaseClient::new(&server_url, None).unwrap();

        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let err = client
            .card_query(&CancellationToken::new(), CARD_UUID, "JSON", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, CardError::InvalidFormat(_)));
        assert_eq!(err.to_string(), "invalid format: JSON");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let (mut server, server_url) = setup_server().await;
        let client = MetabaseClient::new(&server_url, None).unwrap();

        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .card_query(&cancel, CARD_UUID, Format::Json, &[])
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        mock.assert_async().await;
    }

    /// Accepts connections and never answers them
    async fn setup_silent_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_cancelled_while_waiting_for_response() {
        let server_url = setup_silent_server().await;
        let client = MetabaseClient::new(&server_url, None).unwrap();

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = std::time::Instant::now();
        let err = client
            .card_query(&cancel, CARD_UUID, Format::Json, &[])
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_transport_times_out() {
        let server_url = setup_silent_server().await;
        let client = MetabaseClient::new(&server_url, None).unwrap();

        let start = tokio::time::Instant::now();
        let err = client
            .card_query(&CancellationToken::new(), CARD_UUID, Format::Json, &[])
            .await
            .unwrap_err();

        match err {
            CardError::Transport(TransportError::Request(e)) => assert!(e.is_timeout()),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_unrepresentable_filter_sends_nothing() {
        let (mut server, server_url) = setup_server().await;
        let client = MetabaseClient::new(&server_url, None).unwrap();

        let mock = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let filters = vec![new_category_filter("ratio", f64::NAN)];
        let err = client
            .card_query(&CancellationToken::new(), CARD_UUID, Format::Json, &filters)
            .await
            .unwrap_err();

        assert!(matches!(err, CardError::SerializationError(_)));
        assert!(err.to_string().starts_with("marshal filters"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transport_error() {
        // nothing listens on the discard port
        let client = MetabaseClient::new("http://127.0.0.1:9", None).unwrap();

        let err = client
            .card_query(&CancellationToken::new(), CARD_UUID, Format::Json, &[])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CardError::Transport(TransportError::Request(_))
        ));
    }

    #[tokio::test]
    async fn test_from_settings() {
        let settings = ClientSettings {
            base_url: "https://bi.example.com/".to_string(),
            timeout: Duration::from_secs(5),
        };

        let client = MetabaseClient::from_settings(&settings).unwrap();
        assert_eq!(
            client.card_query_url(CARD_UUID, Format::Csv),
            format!(
                "https://bi.example.com/api/public/card/{}/query/csv",
                CARD_UUID
            )
        );
    }

    #[tokio::test]
    async fn test_card_query_with_retry_recovers() {
        let (mut server, server_url) = setup_server().await;
        let client = MetabaseClient::new(&server_url, None).unwrap();

        let failing = server
            .mock("GET", card_path("json").as_str())
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("warming up")
            .expect(1)
            .create_async()
            .await;

        let retry = RetrySettings::new(3, Duration::from_millis(10)).unwrap();
        let cancel = CancellationToken::new();

        // the first mock is exhausted after one hit, later requests fall through to this one
        let succeeding = server
            .mock("GET", card_path("json").as_str())
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .expect(1)
            .create_async()
            .await;

        let body = client
            .card_query_with_retry(&cancel, CARD_UUID, Format::Json, &[], &retry)
            .await
            .unwrap();

        assert_eq!(body.as_ref(), b"[]");
        failing.assert_async().await;
        succeeding.assert_async().await;
    }

    #[tokio::test]
    async fn test_card_query_with_retry_exhausted() {
        let (mut server, server_url) = setup_server().await;
        let client = MetabaseClient::new(&server_url, None).unwrap();

        let mock = server
            .mock("GET", card_path("csv").as_str())
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .expect(2)
            .create_async()
            .await;

        let retry = RetrySettings::new(2, Duration::from_millis(10)).unwrap();
        let err = client
            .card_query_with_retry(&CancellationToken::new(), CARD_UUID, Format::Csv, &[], &retry)
            .await
            .unwrap_err();

        assert!(matches!(
            err.last_error(),
            Some(CardError::UpstreamError { status, .. }) if *status == StatusCode::INTERNAL_SERVER_ERROR
        ));
        assert!(err.to_string().starts_with("after 2 attempts"));
        mock.assert_async().await;
    }
}
