//! Independent verification of published challenge material.
//!
//! Submitting a challenge to the CA before the material is visible burns
//! time (and, for repeated failures, rate limits), so the flow first checks
//! the world the way the CA will: a TXT lookup through public resolvers for
//! DNS-01, a plain HTTP fetch for HTTP-01. Only then is the CA asked to
//! validate, and its status polled.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Instant;

use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::Resolver;
use lazy_static::lazy_static;

use crate::api::ChallengeStatus;
use crate::order::{Challenge, ChallengeInstruction};
use crate::poll::{PollOutcome, Poller};
use crate::req::{new_agent, req_get, req_safe_read_body};
use crate::trans::Transport;
use crate::{Error, Result};

lazy_static! {
    /// Public resolvers queried independently during the DNS self-check:
    /// Google, Cloudflare, Quad9.
    pub(crate) static ref PUBLIC_RESOLVERS: Vec<IpAddr> = vec![
        IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
        IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
        IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)),
    ];
}

/// Check that the instruction's material is actually visible to the world.
///
/// `Ok(false)` means "not published yet" and is the expected answer until
/// the caller has done their part. It is never an error.
pub(crate) fn self_check(
    instruction: &ChallengeInstruction,
    resolvers: &[IpAddr],
) -> Result<bool> {
    match instruction {
        ChallengeInstruction::Http01 {
            domain,
            file_path,
            file_content,
        } => http_body_matches(domain, file_path, file_content),
        ChallengeInstruction::Dns01 {
            record_name,
            record_value,
            ..
        } => dns_txt_matches(resolvers, record_name, record_value),
    }
}

/// Success requires status 200 and exact body equality.
pub(crate) fn http_body_matches(domain: &str, file_path: &str, expected: &str) -> Result<bool> {
    let url = format!("http://{}{}", domain, file_path);
    debug!("Self-check {}", url);
    match req_get(&new_agent(), &url) {
        Ok(res) => {
            if res.status() != 200 {
                return Ok(false);
            }
            let body = req_safe_read_body(res);
            Ok(body == expected)
        }
        // an error status or an unreachable server both just mean the
        // file is not being served yet
        Err(ureq::Error::Status(_, _)) => Ok(false),
        Err(ureq::Error::Transport(transport)) => {
            debug!("Self-check fetch failed: {}", transport);
            Ok(false)
        }
    }
}

/// Success requires at least one resolver returning a TXT value exactly
/// equal to the expected value. NXDOMAIN and empty answers mean the record
/// has not propagated yet, not that anything is wrong.
pub(crate) fn dns_txt_matches(
    resolvers: &[IpAddr],
    record_name: &str,
    expected: &str,
) -> Result<bool> {
    for ip in resolvers {
        let group = NameServerConfigGroup::from_ips_clear(&[*ip], 53, true);
        let config = ResolverConfig::from_parts(None, vec![], group);
        let resolver = match Resolver::new(config, ResolverOpts::default()) {
            Ok(resolver) => resolver,
            Err(e) => {
                debug!("Resolver {} unavailable: {}", ip, e);
                continue;
            }
        };
        match resolver.txt_lookup(record_name) {
            Ok(lookup) => {
                if lookup.iter().any(|txt| txt.to_string() == expected) {
                    debug!("TXT {} confirmed via {}", record_name, ip);
                    return Ok(true);
                }
            }
            Err(err) => match err.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => {
                    trace!("TXT {} not yet visible via {}", record_name, ip);
                }
                _ => debug!("TXT lookup via {} failed: {}", ip, err),
            },
        }
    }
    Ok(false)
}

/// Tell the CA to validate and poll the challenge until it settles.
///
/// An `invalid` outcome carries the CA's problem detail verbatim; running
/// out of polling time is a [`Timeout`], distinct from `invalid`, since
/// nothing has failed yet.
///
/// [`Timeout`]: ../enum.Error.html#variant.Timeout
pub(crate) fn confirm_with_ca(
    transport: &Transport,
    challenge: &Challenge,
    poller: &Poller,
    deadline: Option<Instant>,
) -> Result<()> {
    challenge.trigger(transport)?;

    poller.wait(deadline, || {
        let refreshed = challenge.refresh(transport)?;
        match refreshed.status {
            ChallengeStatus::Valid => Ok(PollOutcome::Done(())),
            ChallengeStatus::Invalid => Err(Error::Validation {
                domain: Some(challenge.domain.clone()),
                detail: refreshed.error_detail(),
            }),
            _ => Ok(PollOutcome::Retry),
        }
    })
}
