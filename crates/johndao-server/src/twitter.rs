//! Posting round winners to the social feed.

use async_trait::async_trait;
use johndao_types::Tweet;
use reqwest::multipart;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while posting.
#[derive(Debug, Error)]
pub enum PosterError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    /// The media upload reply carried no media id.
    #[error("media upload returned no media id")]
    MissingMediaId,

    /// Posting is not configured.
    #[error("no posting credentials configured")]
    Disabled,
}

/// Publishes a tweet.
#[async_trait]
pub trait TweetPoster: Send + Sync {
    /// Posts `tweet`. Image tweets download their image and attach it.
    async fn post(&self, tweet: &Tweet) -> Result<(), PosterError>;
}

#[derive(Debug, Deserialize)]
struct MediaUpload {
    media_id_string: Option<String>,
}

/// Posts through the v2 tweet endpoint with an OAuth 2.0 bearer token.
#[derive(Clone)]
pub struct HttpTweetPoster {
    client: reqwest::Client,
    api_base: String,
    upload_base: String,
    bearer_token: Option<String>,
}

impl HttpTweetPoster {
    pub fn new(
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
        bearer_token: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            upload_base: upload_base.into().trim_end_matches('/').to_string(),
            bearer_token,
        }
    }

    fn token(&self) -> Result<&str, PosterError> {
        self.bearer_token.as_deref().ok_or(PosterError::Disabled)
    }

    async fn create_tweet(&self, body: Value) -> Result<(), PosterError> {
        let resp = self
            .client
            .post(format!("{}/2/tweets", self.api_base))
            .bearer_auth(self.token()?)
            .json(&body)
            .send()
            .await?;
        check(resp, "tweets").await?;
        Ok(())
    }

    async fn upload_image(&self, url: &str) -> Result<String, PosterError> {
        let image = self.client.get(url).send().await?;
        let image = check(image, "image download").await?;
        let mime = image
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = image.bytes().await?;
        tracing::debug!(bytes = bytes.len(), %mime, "downloaded tweet image");

        let part = multipart::Part::bytes(bytes.to_vec())
            .file_name("image")
            .mime_str(&mime)?;
        let form = multipart::Form::new().part("media", part);
        let resp = self
            .client
            .post(format!("{}/1.1/media/upload.json", self.upload_base))
            .bearer_auth(self.token()?)
            .multipart(form)
            .send()
            .await?;
        let upload: MediaUpload = check(resp, "media upload").await?.json().await?;
        upload.media_id_string.ok_or(PosterError::MissingMediaId)
    }
}

async fn check(
    resp: reqwest::Response,
    endpoint: &'static str,
) -> Result<reqwest::Response, PosterError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(PosterError::Status {
        endpoint,
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl TweetPoster for HttpTweetPoster {
    async fn post(&self, tweet: &Tweet) -> Result<(), PosterError> {
        match tweet {
            Tweet::Tweet(text) => self.create_tweet(json!({ "text": text })).await,
            Tweet::ImageTweet { tweet, image_path } => {
                let media_id = self.upload_image(image_path).await?;
                self.create_tweet(json!({
                    "text": tweet,
                    "media": { "media_ids": [media_id] }
                }))
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{header, HeaderMap};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    type Posted = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    async fn tweets(
        State(posted): State<Posted>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        posted.lock().unwrap().push((auth, body));
        Json(json!({ "data": { "id": "1" } }))
    }

    async fn upload() -> Json<Value> {
        Json(json!({ "media_id_string": "777" }))
    }

    async fn image() -> ([(header::HeaderName, &'static str); 1], Vec<u8>) {
        ([(header::CONTENT_TYPE, "image/png")], vec![0x89, b'P', b'N', b'G'])
    }

    async fn spawn_api() -> (String, Posted) {
        let posted: Posted = Arc::default();
        let app = Router::new()
            .route("/2/tweets", post(tweets))
            .route("/1.1/media/upload.json", post(upload))
            .route("/img.png", get(image))
            .with_state(posted.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), posted)
    }

    #[tokio::test]
    async fn posts_text_and_image_tweets() {
        let (base, posted) = spawn_api().await;
        let poster = HttpTweetPoster::new(&base, &base, Some("secret".to_string()));

        poster
            .post(&Tweet::Tweet("hello".to_string()))
            .await
            .unwrap();
        poster
            .post(&Tweet::ImageTweet {
                tweet: "look".to_string(),
                image_path: format!("{base}/img.png"),
            })
            .await
            .unwrap();

        let posted = posted.lock().unwrap();
        assert_eq!(posted.len(), 2);
        assert_eq!(posted[0].0.as_deref(), Some("Bearer secret"));
        assert_eq!(posted[0].1, json!({ "text": "hello" }));
        assert_eq!(posted[1].1["media"]["media_ids"][0], "777");
    }

    #[tokio::test]
    async fn unconfigured_poster_refuses() {
        let poster = HttpTweetPoster::new("http://127.0.0.1:9", "http://127.0.0.1:9", None);
        let err = poster
            .post(&Tweet::Tweet("hello".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, PosterError::Disabled));
    }
}
