use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error(transparent)]
    Deserialize(#[from] serde_json::Error),
    #[error("{endpoint} returned {status}")]
    Status {
        endpoint: String,
        status: StatusCode,
    },
    #[error("invalid url '{0}'")]
    InvalidUrl(String),
    #[error("no manga id given, use --manga_id or --url")]
    MissingMangaId,
    #[error("no credentials given, use --token or --username and --password")]
    MissingCredentials,
    #[error("login failed: {0}")]
    Login(String),
}
