use crate::config::PipelineConfig;
use crate::domain::ports::{ClockRef, StoreRef};
use crate::domain::token::PaymentStateToken;
use crate::error::Result;
use uuid::Uuid;

/// Issues and consumes the single-use tokens that tie a client's payment
/// flow to one application.
pub struct TokenIssuer {
    store: StoreRef,
    clock: ClockRef,
    config: PipelineConfig,
}

impl TokenIssuer {
    pub fn new(store: StoreRef, clock: ClockRef, config: PipelineConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub async fn issue(&self, application_id: i64) -> Result<PaymentStateToken> {
        let expires_at = self.clock.now()
            + chrono::Duration::from_std(self.config.token_ttl)
                .map_err(|e| crate::error::PipelineError::Validation(e.to_string()))?;
        let token = PaymentStateToken::issue(application_id, expires_at);
        self.store.put_token(token.clone()).await?;
        Ok(token)
    }

    /// Validates and burns the token; returns the bound application id.
    /// A second consume, or a consume past expiry, fails.
    pub async fn consume(&self, token: &Uuid) -> Result<i64> {
        let consumed = self.store.consume_token(token, self.clock.now()).await?;
        Ok(consumed.application_id)
    }
}
