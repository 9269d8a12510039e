use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::config::{DEXMARK_USER_AGENT, REQUEST_TIMEOUT};
use crate::error::Error;

const CHAPTER_LIST_LIMIT: &str = "100";

/// Opaque id of one chapter of a manga in one language.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct ChapterId(String);

impl ChapterId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        ChapterId(id.into())
    }
}

impl fmt::Display for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bearer credential for the authenticated endpoints.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new<S: Into<String>>(token: S) -> Self {
        SessionToken(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keep the token out of debug logs
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

/// The remote operations the sync needs.
#[async_trait]
pub trait Gateway {
    async fn login(&self, username: &str, password: &str) -> Result<SessionToken, Error>;

    /// Chapters of `manga_id` translated to `language`, in the order the service returns them.
    async fn chapters(&self, manga_id: &str, language: &str) -> Result<Vec<ChapterId>, Error>;

    /// Chapters of `manga_id` the user already read, in every language.
    async fn read_markers(
        &self,
        token: &SessionToken,
        manga_id: &str,
    ) -> Result<HashSet<ChapterId>, Error>;

    async fn mark_read(&self, token: &SessionToken, chapter: &ChapterId) -> Result<(), Error>;
}

#[derive(Serialize)]
struct LoginBody<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginToken {
    session: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: LoginToken,
}

#[derive(Deserialize)]
struct ChapterData {
    id: ChapterId,
}

#[derive(Deserialize)]
struct ChapterEntry {
    data: ChapterData,
}

#[derive(Deserialize)]
struct ChapterListResponse {
    results: Vec<ChapterEntry>,
}

#[derive(Deserialize)]
struct ReadMarkersResponse {
    data: Vec<ChapterId>,
}

pub struct MangadexClient {
    http: reqwest::Client,
    api_base: String,
}

impl MangadexClient {
    pub fn new(api_base: &str) -> Result<Self, Error> {
        Url::parse(api_base).map_err(|_| Error::InvalidUrl(api_base.to_string()))?;

        let http = reqwest::Client::builder()
            .user_agent(DEXMARK_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(MangadexClient {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }
}

async fn mangadex_request(request: RequestBuilder, endpoint: &str) -> Result<Response, Error> {
    let response = request.send().await?;

    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::TOO_MANY_REQUESTS => {
            log::warn!("{} is rate limiting us", endpoint);
            Err(Error::Status {
                endpoint: endpoint.to_string(),
                status: StatusCode::TOO_MANY_REQUESTS,
            })
        }
        status => Err(Error::Status {
            endpoint: endpoint.to_string(),
            status,
        }),
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, Error> {
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

#[async_trait]
impl Gateway for MangadexClient {
    async fn login(&self, username: &str, password: &str) -> Result<SessionToken, Error> {
        let request = self
            .http
            .post(self.endpoint("/auth/login"))
            .json(&LoginBody { username, password });

        let response = match mangadex_request(request, "/auth/login").await {
            Ok(response) => response,
            Err(Error::Status { status, .. }) => return Err(Error::Login(status.to_string())),
            Err(e) => return Err(e),
        };

        let res: LoginResponse = parse_json(response)
            .await
            .map_err(|e| Error::Login(format!("unexpected response: {}", e)))?;

        if res.token.session.is_empty() {
            return Err(Error::Login("empty session token".to_string()));
        }

        Ok(SessionToken::new(res.token.session))
    }

    async fn chapters(&self, manga_id: &str, language: &str) -> Result<Vec<ChapterId>, Error> {
        let params = [
            ("limit", CHAPTER_LIST_LIMIT),
            ("manga", manga_id),
            ("translatedLanguage[]", language),
        ];
        let endpoint = self.endpoint("/chapter");
        let url = Url::parse_with_params(&endpoint, &params)
            .map_err(|_| Error::InvalidUrl(endpoint.clone()))?;

        let response = mangadex_request(self.http.get(url), "/chapter").await?;
        let res: ChapterListResponse = parse_json(response).await?;

        Ok(res.results.into_iter().map(|entry| entry.data.id).collect())
    }

    async fn read_markers(
        &self,
        token: &SessionToken,
        manga_id: &str,
    ) -> Result<HashSet<ChapterId>, Error> {
        let path = format!("/manga/{}/read", manga_id);
        let request = self
            .http
            .get(self.endpoint(&path))
            .bearer_auth(token.as_str());

        let response = mangadex_request(request, &path).await?;
        let res: ReadMarkersResponse = parse_json(response).await?;

        Ok(res.data.into_iter().collect())
    }

    async fn mark_read(&self, token: &SessionToken, chapter: &ChapterId) -> Result<(), Error> {
        let path = format!("/chapter/{}/read", chapter);
        let request = self
            .http
            .post(self.endpoint(&path))
            .bearer_auth(token.as_str())
            .json(&serde_json::json!({}));

        mangadex_request(request, &path).await?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use mockito::{Matcher, Server};
    use serde_json::json;

    use super::*;

    fn ids(ids: &[&str]) -> Vec<ChapterId> {
        ids.iter().map(|id| ChapterId::new(*id)).collect()
    }

    #[tokio::test]
    async fn test_login() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/login")
            .match_body(Matcher::Json(json!({"username": "reader", "password": "hunter2"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"result":"ok","token":{"session":"abc","refresh":"def"}}"#)
            .create_async()
            .await;

        let client = MangadexClient::new(&server.url()).unwrap();
        let token = client.login("reader", "hunter2").await.unwrap();

        assert_eq!(token.as_str(), "abc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/login")
            .with_status(401)
            .with_body(r#"{"result":"error"}"#)
            .create_async()
            .await;

        let client = MangadexClient::new(&server.url()).unwrap();
        let err = client.login("reader", "wrong").await.unwrap_err();

        assert!(matches!(err, Error::Login(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_login_without_token() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body(r#"{"result":"ok"}"#)
            .create_async()
            .await;

        let client = MangadexClient::new(&server.url()).unwrap();
        let err = client.login("reader", "hunter2").await.unwrap_err();

        assert!(matches!(err, Error::Login(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_chapters() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/chapter")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("limit".into(), "100".into()),
                Matcher::UrlEncoded("manga".into(), "manga-1".into()),
                Matcher::UrlEncoded("translatedLanguage[]".into(), "en".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "results": [
                        {"result": "ok", "data": {"id": "c2", "type": "chapter"}},
                        {"result": "ok", "data": {"id": "c1", "type": "chapter"}},
                        {"result": "ok", "data": {"id": "c3", "type": "chapter"}}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = MangadexClient::new(&server.url()).unwrap();
        let chapters = client.chapters("manga-1", "en").await.unwrap();

        assert_eq!(chapters, ids(&["c2", "c1", "c3"]));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_read_markers() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/manga/manga-1/read")
            .match_header("authorization", "Bearer abc")
            .with_status(200)
            .with_body(r#"{"result":"ok","data":["c1","c9"]}"#)
            .create_async()
            .await;

        let client = MangadexClient::new(&server.url()).unwrap();
        let markers = client
            .read_markers(&SessionToken::new("abc"), "manga-1")
            .await
            .unwrap();

        assert_eq!(markers, ids(&["c1", "c9"]).into_iter().collect::<HashSet<_>>());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_mark_read() {
        let mut server = Server::new_async().await;
        let ok = server
            .mock("POST", "/chapter/c1/read")
            .match_header("authorization", "Bearer abc")
            .match_body(Matcher::Json(json!({})))
            .with_status(200)
            .with_body(r#"{"result":"ok"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/chapter/c2/read")
            .with_status(500)
            .create_async()
            .await;

        let client = MangadexClient::new(&format!("{}/", server.url())).unwrap();
        let token = SessionToken::new("abc");

        client.mark_read(&token, &ChapterId::new("c1")).await.unwrap();
        ok.assert_async().await;

        let err = client
            .mark_read(&token, &ChapterId::new("c2"))
            .await
            .unwrap_err();
        match err {
            Error::Status { endpoint, status } => {
                assert_eq!(endpoint, "/chapter/c2/read");
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[test]
    fn test_session_token_debug_is_redacted() {
        let token = SessionToken::new("secret");
        assert!(!format!("{:?}", token).contains("secret"));
    }
}
