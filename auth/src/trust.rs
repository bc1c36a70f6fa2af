//! `trust`: accept whatever username the client presented, no challenge
//! sent at all (spec.md §4.7's first provider — the degenerate case every
//! other provider builds on).

use async_trait::async_trait;
use common::error::Result;

use crate::{AuthOutcome, AuthTransport, CredentialProvider};

pub struct TrustProvider;

#[async_trait]
impl CredentialProvider for TrustProvider {
    fn name(&self) -> &'static str {
        "trust"
    }

    async fn authenticate(&self, session_user: &str, _transport: &mut dyn AuthTransport) -> Result<AuthOutcome> {
        Ok(AuthOutcome { iris_username: session_user.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ScriptedTransport;
    use std::collections::VecDeque;

    #[tokio::test]
    async fn trust_accepts_any_username_without_a_challenge() {
        let mut transport = ScriptedTransport { responses: VecDeque::new(), sent: Vec::new() };
        let outcome = TrustProvider.authenticate("anyone", &mut transport).await.unwrap();
        assert_eq!(outcome.iris_username, "anyone");
        assert!(transport.sent.is_empty());
    }
}
