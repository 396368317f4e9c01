//
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::acc::AcmeKey;
use crate::api::{ApiAuth, ApiChallenge, ApiEmptyObject, ChallengeStatus};
use crate::jwt::key_authorization;
use crate::trans::Transport;
use crate::util::read_json;
use crate::{Error, Result};

/// The proof method the caller wants to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeKind {
    /// A text file served over plain HTTP from the domain's web server.
    #[serde(rename = "http-01")]
    Http01,
    /// A `TXT` record under `_acme-challenge.<domain>`.
    #[serde(rename = "dns-01")]
    Dns01,
}

impl ChallengeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::Http01 => "http-01",
            ChallengeKind::Dns01 => "dns-01",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "http" | "http-01" => Ok(ChallengeKind::Http01),
            "dns" | "dns-01" => Ok(ChallengeKind::Dns01),
            _ => Err(Error::InvalidInput(format!(
                "unknown validation method: {}",
                s
            ))),
        }
    }
}

/// An authorization (ownership proof) for a single domain name.
///
/// Each authorization of an order must be progressed to a valid state
/// before the ACME API will issue a certificate. Whether that requires
/// work depends on previous orders against the same account; the CA
/// remembers proven ownership for a while.
#[derive(Debug)]
pub struct Auth {
    api_auth: ApiAuth,
    auth_url: String,
}

impl Auth {
    pub(crate) fn new(api_auth: ApiAuth, auth_url: &str) -> Self {
        Auth {
            api_auth,
            auth_url: auth_url.into(),
        }
    }

    /// Domain name for this authorization.
    pub fn domain_name(&self) -> &str {
        &self.api_auth.identifier.value
    }

    /// Whether we actually need to prove ownership. This might not be
    /// needed if it was proven recently in a previous order.
    pub fn need_challenge(&self) -> bool {
        !self.api_auth.is_status_valid()
    }

    /// Select the challenge of the requested kind.
    ///
    /// The kind is resolved exactly once, here; everything downstream
    /// carries the resolved [`Challenge`] record. Not every CA offers every
    /// kind for every identifier, in which case this fails naming the
    /// domain so the caller can pick another method.
    ///
    /// [`Challenge`]: struct.Challenge.html
    pub fn challenge(&self, kind: ChallengeKind) -> Result<Challenge> {
        let api = self
            .api_auth
            .challenge_of_type(kind.as_str())
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "no {} challenge offered for domain {}",
                    kind,
                    self.domain_name()
                ))
            })?;
        Ok(Challenge {
            domain: self.domain_name().to_string(),
            kind,
            url: api.url.clone(),
            auth_url: self.auth_url.clone(),
            token: api.token.clone(),
            status: api.status,
        })
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_auth(&self) -> &ApiAuth {
        &self.api_auth
    }
}

/// One concrete challenge for one domain.
///
/// A plain serializable record: no handles, so it can go straight into the
/// persisted session and be acted on from a later process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub domain: String,
    pub kind: ChallengeKind,
    pub url: String,
    pub auth_url: String,
    pub token: String,
    pub status: ChallengeStatus,
}

impl Challenge {
    /// The material the caller must publish before verification can pass.
    ///
    /// Deterministic in (account public key, token): recomputing for the
    /// same session always yields the same instruction.
    pub fn instruction(&self, key: &AcmeKey) -> ChallengeInstruction {
        match self.kind {
            ChallengeKind::Http01 => ChallengeInstruction::Http01 {
                domain: self.domain.clone(),
                file_path: format!("/.well-known/acme-challenge/{}", self.token),
                file_content: key_authorization(&self.token, key, false),
            },
            ChallengeKind::Dns01 => ChallengeInstruction::Dns01 {
                domain: self.domain.clone(),
                record_name: format!("_acme-challenge.{}", self.domain),
                record_value: key_authorization(&self.token, key, true),
            },
        }
    }

    /// Ask the CA to start checking the published proof.
    pub(crate) fn trigger(&self, transport: &Transport) -> Result<()> {
        let res = transport.call(&self.url, &ApiEmptyObject)?;
        let _: ApiChallenge = read_json(res)?;
        Ok(())
    }

    /// POST-as-GET the current challenge state.
    pub(crate) fn refresh(&self, transport: &Transport) -> Result<ApiChallenge> {
        let res = transport.call_get(&self.url)?;
        read_json(res)
    }
}

/// What the caller must publish, one entry per domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChallengeInstruction {
    /// Serve `file_content` as plain text under
    /// `http://<domain><file_path>`.
    #[serde(rename = "http-01")]
    Http01 {
        domain: String,
        file_path: String,
        file_content: String,
    },
    /// Create a `TXT` record `record_name` with value `record_value`.
    #[serde(rename = "dns-01")]
    Dns01 {
        domain: String,
        record_name: String,
        record_value: String,
    },
}

impl ChallengeInstruction {
    pub fn domain(&self) -> &str {
        match self {
            ChallengeInstruction::Http01 { domain, .. } => domain,
            ChallengeInstruction::Dns01 { domain, .. } => domain,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::*;

    #[test]
    fn test_get_challenges() -> Result<()> {
        let server = crate::test::with_directory_server();
        let url = DirectoryUrl::Other(&server.dir_url);
        let dir = Directory::from_url(url)?;
        let acc = dir.register_account("foo@bar.com", crate::acc::AcmeKey::new())?;
        let ord = acc.new_order(&["test.sailmail.xyz"])?;
        let auths = ord.authorizations()?;
        assert_eq!(auths.len(), 1);
        let auth = &auths[0];
        assert_eq!(auth.domain_name(), "test.sailmail.xyz");

        let http = auth.challenge(ChallengeKind::Http01)?;
        assert_eq!(http.status, crate::api::ChallengeStatus::Pending);
        let dns = auth.challenge(ChallengeKind::Dns01)?;
        assert_ne!(http.token, "");
        assert_eq!(http.token, dns.token);
        Ok(())
    }

    #[test]
    fn test_instructions_carry_publication_material() {
        let key = crate::acc::AcmeKey::new();
        let chall = Challenge {
            domain: "example.com".into(),
            kind: ChallengeKind::Http01,
            url: "https://ca/chall/1".into(),
            auth_url: "https://ca/authz/1".into(),
            token: "tok123".into(),
            status: crate::api::ChallengeStatus::Pending,
        };

        match chall.instruction(&key) {
            ChallengeInstruction::Http01 {
                domain,
                file_path,
                file_content,
            } => {
                assert_eq!(domain, "example.com");
                assert_eq!(file_path, "/.well-known/acme-challenge/tok123");
                assert!(file_content.starts_with("tok123."));
            }
            other => panic!("expected http-01 instruction, got {:?}", other),
        }

        let dns = Challenge {
            kind: ChallengeKind::Dns01,
            ..chall
        };
        match dns.instruction(&key) {
            ChallengeInstruction::Dns01 {
                record_name,
                record_value,
                ..
            } => {
                assert_eq!(record_name, "_acme-challenge.example.com");
                // base64url sha256, no padding
                assert_eq!(record_value.len(), 43);
            }
            other => panic!("expected dns-01 instruction, got {:?}", other),
        }
    }

    #[test]
    fn test_challenge_kind_from_str() {
        assert_eq!("http".parse::<ChallengeKind>().unwrap(), ChallengeKind::Http01);
        assert_eq!("dns-01".parse::<ChallengeKind>().unwrap(), ChallengeKind::Dns01);
        assert!("tls-alpn-01".parse::<ChallengeKind>().is_err());
    }
}
