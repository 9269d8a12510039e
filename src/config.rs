use std::time::Duration;

use crate::error::Error;
use crate::mangadex::SessionToken;
use crate::sync::{Pacing, RetryPolicy};
use crate::title::parse_title_url;
use crate::Args;

pub const DEXMARK_USER_AGENT: &str = concat!("dexmark/", env!("CARGO_PKG_VERSION"));
pub const MANGADEX_API_URL: &str = "https://api.mangadex.org";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// MangaDex asks for at most 5 requests per second on the mark-read endpoint
pub const MARKS_PER_WINDOW: usize = 5;
pub const MARK_WINDOW: Duration = Duration::from_millis(1100);

pub const SETTLE_DELAY: Duration = Duration::from_secs(1);
// Value of a bare --force, in seconds
pub const DEFAULT_FORCE_DELAY: &str = "30";
pub const FORCE_EXTRA_ATTEMPTS: u32 = 4;

#[derive(Debug, Clone)]
pub enum Credentials {
    Token(SessionToken),
    Login { username: String, password: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub manga_id: String,
    pub title: Option<String>,
    pub language: String,
    pub credentials: Credentials,
    pub print_token: bool,
    pub force: Option<Duration>,
    pub api_base: String,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Config, Error> {
        let title = match args.url.as_deref() {
            None => None,
            Some(link) => match parse_title_url(link) {
                Ok(title) => Some(title),
                // An explicit id makes the link optional
                Err(e) if args.manga_id.is_some() => {
                    log::warn!("ignoring --url: {}", e);
                    None
                }
                Err(e) => return Err(e),
            },
        };

        let manga_id = match (args.manga_id, &title) {
            (Some(id), _) if !id.trim().is_empty() => id.trim().to_string(),
            (_, Some(title)) => title.manga_id.clone(),
            _ => return Err(Error::MissingMangaId),
        };

        let credentials = match (args.token, args.username, args.password) {
            (Some(token), _, _) if !token.is_empty() => Credentials::Token(SessionToken::new(token)),
            (_, Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Credentials::Login { username, password }
            }
            _ => return Err(Error::MissingCredentials),
        };

        Ok(Config {
            manga_id,
            title: title.and_then(|t| t.name),
            language: args.language,
            credentials,
            print_token: args.print_token,
            force: args.force.map(Duration::from_secs),
            api_base: args.api,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self.force {
            None => RetryPolicy {
                max_attempts: 1,
                retry_delay: Duration::ZERO,
                settle: SETTLE_DELAY,
            },
            Some(delay) => RetryPolicy {
                max_attempts: 1 + FORCE_EXTRA_ATTEMPTS,
                retry_delay: delay,
                settle: SETTLE_DELAY,
            },
        }
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            max_per_window: MARKS_PER_WINDOW,
            window: MARK_WINDOW,
        }
    }
}
