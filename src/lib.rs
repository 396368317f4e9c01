#![warn(clippy::all)]
//! acme-twostep is a library for obtaining TLS certificates from ACME
//! (Automatic Certificate Management Environment) services such as
//! [Let's Encrypt](https://letsencrypt.org/), built for flows where a
//! human publishes the challenge material by hand.
//!
//! Uses ACME v2 to issue certificates.
//!
//! # Quick start
//!
//! The flow is two independent invocations bridged by a session store.
//! Nothing needs to stay in memory in between; the second call may run in
//! a different process, hours later.
//!
//! ```no_run
//! use acme_twostep::{ChallengeKind, DirectoryUrl, Error, Issuer, IssuerConfig};
//! use acme_twostep::session::FileStore;
//!
//! fn request_cert() -> Result<(), Error> {
//!
//! // Use DirectoryUrl::LetsEncrypt for the real thing.
//! let config = IssuerConfig::new(DirectoryUrl::LetsEncryptStaging);
//!
//! // Paused sessions are saved to the current dir.
//! let store = FileStore::new(".");
//!
//! let issuer = Issuer::new(config, store);
//!
//! // Step 1: register an account, create an order, and get back what
//! // must be published per domain. For HTTP, each instruction is a text
//! // file to place in the web server's root:
//! //
//! //   http://myfancydomain.com/.well-known/acme-challenge/<token>
//! let start = issuer.begin_issuance(
//!     &["myfancydomain.com", "www.myfancydomain.com"],
//!     "foo@bar.com",
//!     ChallengeKind::Http01,
//! )?;
//!
//! for challenge in &start.challenges {
//!     // Here you must do "something" to place the file/contents in
//!     // the correct place, or hand the instruction to whoever can.
//!     println!("{:?}", challenge);
//! }
//!
//! // [time passes, files get published]
//!
//! // Step 2: resume from the store. Each domain is self-checked before
//! // the CA is asked to validate; domains that pass are finalized into
//! // a certificate bundle once all of them are through.
//! let outcome = issuer.check_and_finalize(&start.request_id)?;
//!
//! if outcome.success {
//!     let cert = outcome.certificate.unwrap();
//!     println!("{}", cert.certificate());
//! } else {
//!     // per-domain results say exactly what is still missing; fix and
//!     // call check_and_finalize again with the same request id
//!     for result in &outcome.results {
//!         println!("{}: {}", result.domain, result.message);
//!     }
//! }
//!
//! Ok(())
//! }
//! ```
//!
//! ## Domain ownership
//!
//! Most website TLS certificates tries to prove ownership/control over the
//! domain they are issued for. For ACME, this means proving you control
//! either a web server answering HTTP requests to the domain, or the DNS
//! server answering name lookups against the domain.
//!
//! The proof material is returned from [`begin_issuance`] as one
//! instruction per domain: a file path and content for
//! [`ChallengeKind::Http01`], a TXT record name and value for
//! [`ChallengeKind::Dns01`].
//!
//! Before the CA is asked to validate, [`check_and_finalize`] verifies the
//! publication independently: a plain HTTP fetch, or TXT lookups against a
//! set of public resolvers. This avoids burning validation attempts (and
//! rate limits) on material that hasn't propagated yet. The self-check can
//! be switched off in [`IssuerConfig`].
//!
//! [`begin_issuance`]: struct.Issuer.html#method.begin_issuance
//! [`check_and_finalize`]: struct.Issuer.html#method.check_and_finalize
//! [`ChallengeKind::Http01`]: enum.ChallengeKind.html#variant.Http01
//! [`ChallengeKind::Dns01`]: enum.ChallengeKind.html#variant.Dns01
//! [`IssuerConfig`]: struct.IssuerConfig.html
//!
//! ## Rate limits
//!
//! The ACME API provider Let's Encrypt uses [rate limits] to ensure the API
//! is not being abused. It might be tempting to set the polling intervals
//! really low, but balance this against the real risk of having access cut
//! off.
//!
//! [rate limits]: https://letsencrypt.org/docs/rate-limits/
//!
//! ### Use staging for dev!
//!
//! Especially take care to use the Let's Encrypt staging environment for
//! development where the rate limits are more relaxed. That is also the
//! default of `IssuerConfig`.
//!
//! ## Implementation details
//!
//! The library uses synchronous I/O and blocking calls; per-domain
//! verification inside one `check_and_finalize` call runs on scoped
//! threads. It is written following the ACME [RFC 8555] and relies on the
//! [openssl](https://docs.rs/openssl/) crate for JWK/JWS and for signing
//! requests to the API (RS256 account keys, RSA certificate keys).
//!
//! [RFC 8555]: https://tools.ietf.org/html/rfc8555
//!
#[macro_use]
extern crate log;

mod acc;
mod cert;
mod dir;
mod error;
mod flow;
mod jwt;
mod poll;
mod req;
mod trans;
mod util;
mod verify;

pub mod api;
pub mod order;
pub mod session;

#[cfg(test)]
mod test;

pub use crate::acc::Account;
pub use crate::cert::{create_rsa_key, Certificate};
pub use crate::dir::{Directory, DirectoryUrl};
pub use crate::error::{Error, Result};
pub use crate::flow::{CheckOutcome, DomainResult, IssuanceStart, Issuer, IssuerConfig};
pub use crate::order::{ChallengeInstruction, ChallengeKind};
