//! Shareable invitation links
//!
//! `<base>?session=<id>&auth=<token>`. Links produced by older clients carry
//! the token under the legacy parameter (`xdr` by default); both are
//! accepted. When a session parameter is present it must agree with the
//! session id inside the token.

use crate::invitation::Invitation;
use duet_core::config::LinkConfig;
use duet_core::{HandshakeError, Result, SessionId};
use url::Url;

/// Build and parse invitation links
#[derive(Debug, Clone)]
pub struct InvitationLink {
    config: LinkConfig,
    start_function: String,
}

impl InvitationLink {
    /// Link codec for `config`, accepting only tokens for `start_function`
    pub fn new(config: LinkConfig, start_function: impl Into<String>) -> Self {
        Self {
            config,
            start_function: start_function.into(),
        }
    }

    /// Shareable URL for `invitation`
    pub fn build(&self, invitation: &Invitation) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| HandshakeError::config(format!("link.base_url: {e}")))?;
        let token = invitation.to_token()?;
        url.query_pairs_mut()
            .append_pair(&self.config.session_param, &invitation.session_id.to_string())
            .append_pair(&self.config.auth_param, &token);
        Ok(url)
    }

    /// Parse a link back into an invitation.
    ///
    /// Every failure is a `Decode` error.
    pub fn parse(&self, link: &str) -> Result<Invitation> {
        let url = Url::parse(link.trim())
            .map_err(|e| HandshakeError::decode(format!("invalid link: {e}")))?;

        let mut session: Option<String> = None;
        let mut token: Option<String> = None;
        let mut legacy_token: Option<String> = None;
        for (name, value) in url.query_pairs() {
            if name == self.config.session_param.as_str() {
                session = Some(value.into_owned());
            } else if name == self.config.auth_param.as_str() {
                token = Some(value.into_owned());
            } else if name == self.config.legacy_auth_param.as_str() {
                legacy_token = Some(value.into_owned());
            }
        }

        let token = token.or(legacy_token).ok_or_else(|| {
            HandshakeError::decode(format!(
                "link has no `{}` parameter",
                self.config.auth_param
            ))
        })?;
        let invitation = Invitation::from_token(&token, &self.start_function).map_err(|e| match e {
            HandshakeError::UnsupportedInvocation { .. } => {
                HandshakeError::decode(format!("link does not start a session: {e}"))
            }
            other => other,
        })?;

        if let Some(session) = session {
            let session_id: SessionId = session.parse().map_err(|e| {
                HandshakeError::decode(format!("invalid session id `{session}`: {e}"))
            })?;
            if session_id != invitation.session_id {
                return Err(HandshakeError::decode(format!(
                    "link session {session_id} does not match token session {}",
                    invitation.session_id
                )));
            }
        }
        Ok(invitation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use duet_core::{
        ArgValue, AuthorizationSubEntry, AuthorizedInvocation, Credentials, InvokedFunction,
    };
    use duet_testkit::{initiator, test_contract};

    fn invitation(session_id: SessionId) -> Invitation {
        let invocation = AuthorizedInvocation {
            function: InvokedFunction {
                contract: test_contract(),
                function_name: "start_game".into(),
            },
            args: vec![ArgValue::U32(session_id), ArgValue::I128(25)].into(),
        };
        let mut entry =
            AuthorizationSubEntry::stub(initiator(), 1, invocation).with_expiration_bound(2_000);
        if let Credentials::Address(creds) = &mut entry.credentials {
            creds.signature = Some(vec![4; 32]);
        }
        Invitation::from_signed_entry(entry, "start_game").unwrap()
    }

    fn links() -> InvitationLink {
        InvitationLink::new(LinkConfig::default(), "start_game")
    }

    #[test]
    fn test_build_then_parse() {
        let inv = invitation(42);
        let url = links().build(&inv).unwrap();
        assert!(url.as_str().contains("session=42"));
        assert_eq!(links().parse(url.as_str()).unwrap(), inv);
    }

    #[test]
    fn test_legacy_parameter_accepted() {
        let inv = invitation(9);
        let token = inv.to_token().unwrap();
        let link = format!("https://duet.example/join?xdr={token}");
        assert_eq!(links().parse(&link).unwrap(), inv);
    }

    #[test]
    fn test_session_mismatch_rejected() {
        let token = invitation(9).to_token().unwrap();
        let link = format!("https://duet.example/join?session=10&auth={token}");
        assert_matches!(links().parse(&link), Err(HandshakeError::Decode { .. }));
    }

    #[test]
    fn test_missing_or_garbled_token_rejected() {
        assert_matches!(
            links().parse("https://duet.example/join?session=1"),
            Err(HandshakeError::Decode { .. })
        );
        assert_matches!(
            links().parse("https://duet.example/join?auth=!!!"),
            Err(HandshakeError::Decode { .. })
        );
        assert_matches!(links().parse("not a url"), Err(HandshakeError::Decode { .. }));
    }

    #[test]
    fn test_foreign_function_is_invalid_link() {
        let token = invitation(3).to_token().unwrap();
        let other = InvitationLink::new(LinkConfig::default(), "end_game");
        let link = format!("https://duet.example/join?auth={token}");
        assert_matches!(other.parse(&link), Err(HandshakeError::Decode { .. }));
    }
}
