//! HTTP [`Resolver`] backed by the configured resolver endpoints.
//!
//! Every call is throttled by the [`http::Client`](crate::http::Client) and
//! wrapped in [`retry`]. An endpoint that is not configured fails closed:
//! the operation returns `FailedPrecondition` without touching the network.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use url::Url;

use crate::{
    collection::Collection,
    config::Config,
    download::{ByteStream, Fetch},
    error::{Error, ErrorKind, Result},
    http::Client as HttpClient,
    protocol::{self, download, tracks, ErrorBody},
    resolver::{validate_reference, Resolver},
    retry::{retry, RetryPolicy},
    track::TrackId,
};

pub struct Gateway {
    http_client: HttpClient,
    tracks_api_url: Option<Url>,
    download_api_url: Option<Url>,
    retry: RetryPolicy,
}

/// Error envelope of a non-success response.
#[derive(Deserialize, Debug)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<ErrorBody>,
}

impl Gateway {
    /// Creates a gateway for the endpoints in `config`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        if config.tracks_api_url.is_none() {
            warn!("tracks API URL is not configured; collections cannot be resolved");
        }
        if config.download_api_url.is_none() {
            warn!("download API URL is not configured; tracks cannot be downloaded");
        }

        Ok(Self {
            http_client: HttpClient::new(config)?,
            tracks_api_url: config.tracks_api_url.clone(),
            download_api_url: config.download_api_url.clone(),
            retry: config.retry,
        })
    }

    fn endpoint<'a>(url: Option<&'a Url>, name: &str) -> Result<&'a Url> {
        url.ok_or_else(|| Error::failed_precondition(format!("{name} API URL is not configured")))
    }

    /// Executes `request` once and returns the body of a successful response.
    ///
    /// A non-success status becomes an error of the matching kind, carrying
    /// the message of the error envelope when there is one.
    async fn call(&self, request: reqwest::Request) -> Result<String> {
        let response = self.http_client.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return Ok(body);
        }

        let message = serde_json::from_str::<ErrorResponse>(&body)
            .ok()
            .and_then(|response| response.error)
            .map_or_else(
                || status.canonical_reason().unwrap_or("no reason").to_owned(),
                |error| error.message().to_owned(),
            );
        Err(Error::new(
            ErrorKind::from_status(status),
            format!("{status}: {message}"),
        ))
    }
}

#[async_trait]
impl Resolver for Gateway {
    async fn resolve(&self, reference: &str) -> Result<Collection> {
        let reference = reference.trim();
        validate_reference(reference)?;

        let mut url = Self::endpoint(self.tracks_api_url.as_ref(), "tracks")?.clone();
        url.query_pairs_mut().append_pair("url", reference);

        debug!("resolving {reference}");
        let body = retry(&self.retry, "tracks", || {
            self.call(self.http_client.get(url.clone()))
        })
        .await?;

        let response = protocol::json::<tracks::Response>(&body, "tracks")?;
        match (response.result, response.error) {
            (Some(result), _) => {
                let collection = Collection::from_result(reference, result);
                info!("resolved {collection} with {} tracks", collection.len());
                Ok(collection)
            }
            (None, Some(error)) => Err(Error::not_found(format!("{reference}: {error}"))),
            (None, None) => Err(Error::unavailable(format!(
                "{reference}: response has neither result nor error"
            ))),
        }
    }

    async fn audio_url(&self, id: &TrackId) -> Result<Url> {
        let endpoint = Self::endpoint(self.download_api_url.as_ref(), "download")?;
        let body = serde_json::to_string(&download::Request::for_track(id))?;

        let text = retry(&self.retry, "download", || {
            let mut request = self.http_client.post(endpoint.clone(), body.clone());
            request
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            self.call(request)
        })
        .await?;

        let response = protocol::json::<download::Response>(&text, "download")?;
        match (response.file_url, response.error) {
            (Some(url), _) => Ok(url),
            (None, Some(error)) => Err(Error::not_found(format!("track {id}: {error}"))),
            (None, None) => Err(Error::not_found(format!("track {id}: no audio URL"))),
        }
    }
}

/// Audio is fetched with the gateway's client, bypassing the throttle.
#[async_trait]
impl Fetch for Gateway {
    async fn fetch(&self, url: &Url) -> Result<ByteStream> {
        self.http_client.fetch(url).await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    /// Serves `responses` in order, one per connection, and counts requests.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (Url, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                read_request(&mut socket).await;

                let response = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        (Url::parse(&format!("http://{addr}/api")).unwrap(), hits)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut request = Vec::new();
        let mut buf = [0_u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&request);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn config(tracks: Option<Url>, download: Option<Url>) -> Config {
        let mut config = Config::new();
        config.tracks_api_url = tracks;
        config.download_api_url = download;
        config.retry = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            factor: 2,
            max_delay: Duration::from_millis(10),
        };
        config
    }

    #[tokio::test]
    async fn missing_endpoints_fail_closed() {
        let gateway = Gateway::new(&config(None, None)).unwrap();

        let err = gateway
            .resolve("https://open.spotify.com/playlist/X")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::FailedPrecondition);

        let err = gateway.audio_url(&"t1".into()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::FailedPrecondition);
    }

    #[tokio::test]
    async fn invalid_reference_makes_no_request() {
        let (url, hits) = serve(vec![]).await;
        let gateway = Gateway::new(&config(Some(url), None)).unwrap();

        let err = gateway.resolve("not a link").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolves_after_server_errors() {
        let (url, hits) = serve(vec![
            (503, r#"{"error": "busy"}"#),
            (
                200,
                r#"{"result": {"id": "X", "type": "playlist", "name": "Mix", "image": "c", "owner": "o", "artists": "", "tracks": [
                    {"id": "t1", "name": "One", "artists": "A", "duration_ms": 1000},
                    {"id": "t2", "name": "Two", "artists": "B", "duration_ms": null},
                    {"id": "t3", "name": "Three", "artists": "C", "duration_ms": 3000}
                ], "gid": 1}}"#,
            ),
        ])
        .await;
        let gateway = Gateway::new(&config(Some(url), None)).unwrap();

        let collection = gateway
            .resolve("open.spotify.com/playlist/X")
            .await
            .unwrap();
        assert_eq!(collection.url, "open.spotify.com/playlist/X");
        assert_eq!(collection.len(), 3);
        assert_eq!(collection.tracks[1].duration, Duration::ZERO);
        assert_eq!(collection.tracks[2].cover, "c");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn upstream_error_message_is_not_found() {
        let (url, _) = serve(vec![(200, r#"{"error": {"message": "no such playlist"}}"#)]).await;
        let gateway = Gateway::new(&config(Some(url), None)).unwrap();

        let err = gateway
            .resolve("https://open.spotify.com/playlist/gone")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(err.to_string().contains("no such playlist"));
    }

    #[tokio::test]
    async fn exhausted_retries_are_unavailable() {
        let (url, hits) = serve(vec![
            (500, r#"{"error": "Internal server error"}"#),
            (502, ""),
            (500, r#"{"error": "Internal server error"}"#),
        ])
        .await;
        let gateway = Gateway::new(&config(None, Some(url))).unwrap();

        let err = gateway.audio_url(&"t1".into()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn audio_url() {
        let (url, _) = serve(vec![(200, r#"{"file_url": "https://cdn.example/t1.mp3"}"#)]).await;
        let gateway = Gateway::new(&config(None, Some(url))).unwrap();

        let audio = gateway.audio_url(&"t1".into()).await.unwrap();
        assert_eq!(audio.as_str(), "https://cdn.example/t1.mp3");
    }

    #[tokio::test]
    async fn missing_track_is_not_retried() {
        let (url, hits) = serve(vec![(404, r#"{"error": "track not found"}"#)]).await;
        let gateway = Gateway::new(&config(None, Some(url))).unwrap();

        let err = gateway.audio_url(&"t1".into()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(err.to_string().contains("track not found"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
