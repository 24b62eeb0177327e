//! Adapter for synchronous validation clients.
//!
//! The wrapped function runs on tokio's blocking pool, never on a runtime
//! worker. If the request future is dropped while the function runs, the call
//! finishes in the background and its result is discarded.

use std::sync::Arc;

use super::{AuthError, TokenValidation, TokenValidator, ValidationFuture};

type ValidateFn = dyn Fn(&str) -> Result<TokenValidation, AuthError> + Send + Sync;

/// [`TokenValidator`] over a blocking validation function.
#[derive(Clone)]
pub struct BlockingTokenValidator {
    validate: Arc<ValidateFn>,
}

impl BlockingTokenValidator {
    pub fn new<F>(validate: F) -> Self
    where
        F: Fn(&str) -> Result<TokenValidation, AuthError> + Send + Sync + 'static,
    {
        Self {
            validate: Arc::new(validate),
        }
    }
}

impl TokenValidator for BlockingTokenValidator {
    fn validate<'a>(&'a self, token: &'a str) -> ValidationFuture<'a> {
        let validate = self.validate.clone();
        let token = token.to_string();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || validate(&token))
                .await
                .map_err(|e| AuthError::Worker(e.to_string()))?
        })
    }

    fn name(&self) -> &'static str {
        "blocking"
    }
}

impl std::fmt::Debug for BlockingTokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingTokenValidator").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_sync_function() {
        let validator = BlockingTokenValidator::new(|token| {
            std::thread::sleep(Duration::from_millis(10));
            Ok(if token == "good" {
                TokenValidation::valid("u-1", "a@example.com", "user")
            } else {
                TokenValidation::invalid()
            })
        });

        assert!(validator.validate("good").await.unwrap().is_valid);
        assert!(!validator.validate("bad").await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_an_error() {
        let validator = BlockingTokenValidator::new(|_| panic!("client crashed"));
        assert!(matches!(
            validator.validate("t").await,
            Err(AuthError::Worker(_))
        ));
    }

    #[tokio::test]
    async fn test_error_is_propagated() {
        let validator =
            BlockingTokenValidator::new(|_| Err(AuthError::Transport("refused".to_string())));
        assert!(matches!(
            validator.validate("t").await,
            Err(AuthError::Transport(_))
        ));
    }
}
