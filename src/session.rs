use crate::config::Credentials;
use crate::error::Error;
use crate::mangadex::{Gateway, SessionToken};

/// Returns the supplied token untouched, or logs in with the username and password.
/// Login is attempted once; any failure is returned to the caller.
pub async fn acquire_session<G>(gateway: &G, credentials: &Credentials) -> Result<SessionToken, Error>
where
    G: Gateway + Sync,
{
    match credentials {
        Credentials::Token(token) => Ok(token.clone()),
        Credentials::Login { username, password } => {
            if username.is_empty() || password.is_empty() {
                return Err(Error::MissingCredentials);
            }

            log::info!("logging in as {}", username);
            gateway.login(username, password).await
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::mangadex::ChapterId;

    #[derive(Default)]
    struct LoginOnly {
        logins: AtomicUsize,
        reject: bool,
    }

    #[async_trait]
    impl Gateway for LoginOnly {
        async fn login(&self, username: &str, _password: &str) -> Result<SessionToken, Error> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(Error::Login("401 Unauthorized".to_string()));
            }
            Ok(SessionToken::new(format!("token-for-{}", username)))
        }

        async fn chapters(&self, _: &str, _: &str) -> Result<Vec<ChapterId>, Error> {
            unreachable!()
        }

        async fn read_markers(&self, _: &SessionToken, _: &str) -> Result<HashSet<ChapterId>, Error> {
            unreachable!()
        }

        async fn mark_read(&self, _: &SessionToken, _: &ChapterId) -> Result<(), Error> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_supplied_token_skips_login() {
        let gateway = LoginOnly::default();
        let credentials = Credentials::Token(SessionToken::new("given"));

        let token = acquire_session(&gateway, &credentials).await.unwrap();

        assert_eq!(token.as_str(), "given");
        assert_eq!(gateway.logins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_login_with_password() {
        let gateway = LoginOnly::default();
        let credentials = Credentials::Login {
            username: "reader".to_string(),
            password: "hunter2".to_string(),
        };

        let token = acquire_session(&gateway, &credentials).await.unwrap();

        assert_eq!(token.as_str(), "token-for-reader");
        assert_eq!(gateway.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_login_failure_is_not_retried() {
        let gateway = LoginOnly {
            reject: true,
            ..Default::default()
        };
        let credentials = Credentials::Login {
            username: "reader".to_string(),
            password: "wrong".to_string(),
        };

        let err = acquire_session(&gateway, &credentials).await.unwrap_err();

        assert!(matches!(err, Error::Login(_)));
        assert_eq!(gateway.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_password_fails_fast() {
        let gateway = LoginOnly::default();
        let credentials = Credentials::Login {
            username: "reader".to_string(),
            password: String::new(),
        };

        let err = acquire_session(&gateway, &credentials).await.unwrap_err();

        assert!(matches!(err, Error::MissingCredentials));
        assert_eq!(gateway.logins.load(Ordering::SeqCst), 0);
    }
}
