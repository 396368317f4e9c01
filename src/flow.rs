//! The two caller-facing operations.
//!
//! [`Issuer::begin_issuance`] registers an account, creates an order and
//! returns per-domain publication instructions plus a request id.
//! [`Issuer::check_and_finalize`] is run later, from whatever process
//! happens to serve it, and drives the order to an issued certificate.
//! All state in between lives in a [`SessionStore`].
//!
//! [`Issuer::begin_issuance`]: struct.Issuer.html#method.begin_issuance
//! [`Issuer::check_and_finalize`]: struct.Issuer.html#method.check_and_finalize
//! [`SessionStore`]: ../session/trait.SessionStore.html

use std::net::IpAddr;
use std::thread;
use std::time::{Duration, Instant};

use openssl::pkey::{PKey, Private};
use serde::Serialize;

use crate::acc::{Account, AcmeKey};
use crate::api::ChallengeStatus;
use crate::cert::{create_rsa_key, Certificate};
use crate::dir::{Directory, DirectoryUrl};
use crate::order::{Challenge, ChallengeInstruction, ChallengeKind};
use crate::poll::{PollOutcome, Poller};
use crate::req::new_agent;
use crate::session::{load_session, save_session, sweep_expired, SessionState, SessionStore};
use crate::verify::{confirm_with_ca, self_check, PUBLIC_RESOLVERS};
use crate::{Error, Result};

/// Tunables for the issuance flow.
///
/// The defaults poll every 3 seconds for at most 90 seconds, self-check
/// before involving the CA, and expire paused sessions after an hour.
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// The ACME directory url.
    pub url: String,
    /// Interval between status polls against the CA.
    pub poll_interval: Duration,
    /// Overall bound for one polling wait.
    pub poll_timeout: Duration,
    /// Verify challenge publication independently before asking the CA.
    pub self_check: bool,
    /// How long a paused session stays resumable.
    pub session_ttl: Duration,
    /// Public resolvers for the DNS-01 self-check, queried independently.
    pub resolvers: Vec<IpAddr>,
}

impl IssuerConfig {
    pub fn new(url: DirectoryUrl) -> Self {
        IssuerConfig {
            url: url.to_url().to_string(),
            poll_interval: Duration::from_secs(3),
            poll_timeout: Duration::from_secs(90),
            self_check: true,
            session_ttl: Duration::from_secs(60 * 60),
            resolvers: PUBLIC_RESOLVERS.clone(),
        }
    }
}

impl Default for IssuerConfig {
    fn default() -> Self {
        IssuerConfig::new(DirectoryUrl::LetsEncryptStaging)
    }
}

/// Issues certificates in two stateless steps over a session store.
pub struct Issuer<S: SessionStore> {
    config: IssuerConfig,
    store: S,
}

/// Challenge material returned to the caller for manual publication.
#[derive(Debug, Clone, Serialize)]
pub struct IssuanceStart {
    /// Key for resuming with `check_and_finalize`.
    pub request_id: String,
    /// One instruction per domain.
    pub challenges: Vec<ChallengeInstruction>,
}

/// Per-domain outcome of a verification attempt.
#[derive(Debug, Clone, Serialize)]
pub struct DomainResult {
    pub domain: String,
    pub verified: bool,
    pub message: String,
    /// For unverified domains, exactly what is still expected to be
    /// published.
    pub expected: Option<ChallengeInstruction>,
}

/// Result of [`Issuer::check_and_finalize`].
///
/// [`Issuer::check_and_finalize`]: struct.Issuer.html#method.check_and_finalize
#[derive(Debug)]
pub struct CheckOutcome {
    /// Whether a certificate was issued.
    pub success: bool,
    /// One entry per domain, in instruction order.
    pub results: Vec<DomainResult>,
    /// The issued bundle, on success.
    pub certificate: Option<Certificate>,
}

impl<S: SessionStore> Issuer<S> {
    pub fn new(config: IssuerConfig, store: S) -> Self {
        Issuer { config, store }
    }

    /// Start an issuance: register/resume the account, create the order and
    /// return what must be published per domain.
    ///
    /// Nothing of the CA conversation survives in memory; the returned
    /// request id keys the persisted session for the second step.
    pub fn begin_issuance(
        &self,
        domains: &[&str],
        email: &str,
        method: ChallengeKind,
    ) -> Result<IssuanceStart> {
        crate::order::validate_domains(domains)?;
        validate_email(email)?;

        let now = time::get_time().sec;
        sweep_expired(&self.store, now)?;

        let dir = Directory::from_url(DirectoryUrl::Other(&self.config.url))?;
        let acc = dir.register_account(email, AcmeKey::new())?;
        let order = acc.new_order(domains)?;

        let auths = order.authorizations()?;
        let mut challenges = Vec::with_capacity(auths.len());
        for auth in &auths {
            let mut challenge = auth.challenge(method)?;
            if !auth.need_challenge() {
                // ownership proven in a recent order, nothing to publish
                challenge.status = ChallengeStatus::Valid;
            }
            challenges.push(challenge);
        }

        let instructions: Vec<ChallengeInstruction> = challenges
            .iter()
            .map(|c| c.instruction(acc.acme_key()))
            .collect();

        let domain_key = create_rsa_key(2048);
        let domain_key_pem = String::from_utf8(
            domain_key
                .private_key_to_pem_pkcs8()
                .expect("private_key_to_pem"),
        )
        .expect("pem utf8");

        let request_id = new_request_id();
        let state = SessionState {
            request_id: request_id.clone(),
            contact_email: email.to_string(),
            account_key_pem: acc.acme_private_key_pem(),
            domain_key_pem,
            account_url: acc.account_url().to_string(),
            order_url: order.order_url().to_string(),
            order: order.api_order().clone(),
            directory: dir.api_directory().clone(),
            nonce: dir.last_nonce(),
            method,
            challenges,
            expires_at: now + self.config.session_ttl.as_secs() as i64,
        };
        save_session(&self.store, &state)?;

        info!(
            "Issuance {} started for {:?} using {}",
            request_id, domains, method
        );

        Ok(IssuanceStart {
            request_id,
            challenges: instructions,
        })
    }

    /// Verify the published material and, if every domain passes, finalize
    /// the order into a certificate bundle.
    ///
    /// Safe to call repeatedly with the same request id: already-verified
    /// domains are not re-validated, and a failed or timed-out attempt
    /// leaves the session resumable.
    pub fn check_and_finalize(&self, request_id: &str) -> Result<CheckOutcome> {
        self.check_and_finalize_by(request_id, None)
    }

    /// Same as [`check_and_finalize`], bounded by a caller deadline that
    /// aborts polling promptly and leaves the session unmodified.
    ///
    /// [`check_and_finalize`]: struct.Issuer.html#method.check_and_finalize
    pub fn check_and_finalize_by(
        &self,
        request_id: &str,
        deadline: Option<Instant>,
    ) -> Result<CheckOutcome> {
        let now = time::get_time().sec;
        sweep_expired(&self.store, now)?;
        let mut state = load_session(&self.store, request_id)?;

        // Rebuild the protocol stack from the plain persisted records. The
        // persisted nonce is possibly stale so it is not banked; the first
        // signed request fetches a fresh one via newNonce.
        let dir = Directory::from_api(new_agent(), state.directory.clone());
        let mut key = AcmeKey::from_pem(state.account_key_pem.as_bytes())?;
        key.set_key_id(state.account_url.clone());
        let acc = dir.resume_account(&state.contact_email, key);

        let poller = Poller::new(self.config.poll_interval, self.config.poll_timeout);

        // one worker per domain; the total wait is bounded by the slowest
        // domain rather than the sum
        let mut settled: Vec<(usize, DomainResult, ChallengeStatus)> = thread::scope(|scope| {
            let mut handles = vec![];
            for (idx, challenge) in state.challenges.iter().enumerate() {
                let acc = &acc;
                let config = &self.config;
                let poller = &poller;
                handles.push(scope.spawn(move || {
                    let (result, status) =
                        verify_domain(acc, challenge, config, poller, deadline);
                    (idx, result, status)
                }));
            }
            handles
                .into_iter()
                .map(|h| h.join().expect("verify worker"))
                .collect()
        });
        settled.sort_by_key(|(idx, _, _)| *idx);

        let mut results = Vec::with_capacity(settled.len());
        for (idx, result, status) in settled {
            state.challenges[idx].status = status;
            results.push(result);
        }

        let all_verified = state
            .challenges
            .iter()
            .all(|c| c.status == ChallengeStatus::Valid);

        // partial progress is kept either way, so the caller can fix only
        // the failing domains and retry the same request id
        state.nonce = dir.last_nonce();
        save_session(&self.store, &state)?;

        if !all_verified {
            debug!(
                "Issuance {} not complete: {} of {} domains verified",
                request_id,
                results.iter().filter(|r| r.verified).count(),
                results.len()
            );
            return Ok(CheckOutcome {
                success: false,
                results,
                certificate: None,
            });
        }

        let certificate = self.finalize(&state, &acc, &poller, deadline)?;
        self.store.remove(request_id)?;
        info!("Issuance {} complete", request_id);

        Ok(CheckOutcome {
            success: true,
            results,
            certificate: Some(certificate),
        })
    }

    fn finalize(
        &self,
        state: &SessionState,
        acc: &Account,
        poller: &Poller,
        deadline: Option<Instant>,
    ) -> Result<Certificate> {
        let domain_key: PKey<Private> = PKey::private_key_from_pem(state.domain_key_pem.as_bytes())
            .map_err(|e| Error::Serialization(format!("unreadable domain key pem: {}", e)))?;

        let mut order = acc.resume_order(state.order.clone(), state.order_url.clone());

        // the order turns ready once the CA has registered all valid auths
        let csr_order = poller.wait(deadline, || {
            order.refresh()?;
            if order.api_order().is_status_invalid() {
                let detail = order
                    .api_order()
                    .error
                    .as_ref()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "order is invalid".to_string());
                return Err(Error::Validation {
                    domain: None,
                    detail,
                });
            }
            Ok(match order.confirm_validations() {
                Some(csr_order) => PollOutcome::Done(csr_order),
                None => PollOutcome::Retry,
            })
        })?;

        let domains = state.domains();
        let cert_order = csr_order.finalize_key(&domains, domain_key, poller, deadline)?;
        cert_order.download_cert()
    }
}

fn verify_domain(
    acc: &Account,
    challenge: &Challenge,
    config: &IssuerConfig,
    poller: &Poller,
    deadline: Option<Instant>,
) -> (DomainResult, ChallengeStatus) {
    let domain = challenge.domain.clone();

    if challenge.status == ChallengeStatus::Valid {
        return (
            DomainResult {
                domain,
                verified: true,
                message: "already verified".into(),
                expected: None,
            },
            ChallengeStatus::Valid,
        );
    }

    let instruction = challenge.instruction(acc.acme_key());

    if config.self_check {
        match self_check(&instruction, &config.resolvers) {
            Ok(true) => debug!("Self-check passed for {}", domain),
            Ok(false) => {
                let message = match challenge.kind {
                    ChallengeKind::Http01 => "challenge file is not being served yet",
                    ChallengeKind::Dns01 => "expected TXT record is not visible yet",
                };
                return (
                    DomainResult {
                        domain,
                        verified: false,
                        message: message.into(),
                        expected: Some(instruction),
                    },
                    challenge.status,
                );
            }
            Err(e) => {
                return (
                    DomainResult {
                        domain,
                        verified: false,
                        message: format!("self-check failed: {}", e),
                        expected: Some(instruction),
                    },
                    challenge.status,
                );
            }
        }
    }

    match confirm_with_ca(acc.transport(), challenge, poller, deadline) {
        Ok(()) => (
            DomainResult {
                domain,
                verified: true,
                message: "verified".into(),
                expected: None,
            },
            ChallengeStatus::Valid,
        ),
        Err(Error::Validation { detail, .. }) => (
            DomainResult {
                domain,
                verified: false,
                message: format!("failed: {}", detail),
                expected: Some(instruction),
            },
            ChallengeStatus::Invalid,
        ),
        Err(Error::Timeout(_)) => (
            DomainResult {
                domain,
                verified: false,
                message: "polling timed out".into(),
                expected: Some(instruction),
            },
            // not failed, the next attempt picks up where this left off
            challenge.status,
        ),
        Err(e) => (
            DomainResult {
                domain,
                verified: false,
                message: e.to_string(),
                expected: Some(instruction),
            },
            challenge.status,
        ),
    }
}

fn validate_email(email: &str) -> Result<()> {
    let mut parts = email.splitn(2, '@');
    let local = parts.next().unwrap_or("");
    let domain = parts.next().unwrap_or("");
    let well_formed = !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !email.contains(char::is_whitespace);
    if !well_formed {
        return Err(Error::InvalidInput(format!(
            "invalid contact email: {}",
            email
        )));
    }
    Ok(())
}

fn new_request_id() -> String {
    let mut buf = [0u8; 8];
    openssl::rand::rand_bytes(&mut buf).expect("rand_bytes");
    buf.iter().map(|b| format!("{:02x}", b)).collect()
}
