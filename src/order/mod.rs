//! Order life cycle.
//!
//! An order goes through a life cycle of different states that require various actions by
//! the user. To ensure the user only use appropriate actions, this library have simple façade
//! structs that wraps the actual [`ApiOrder`].
//!
//! 1. First prove ownership:
//!    * [`NewOrder`] -> [`Auth`]* -> [`Challenge`]
//! 2. Then submit CSR and download the cert.
//!    * [`NewOrder`] -> [`CsrOrder`] -> [`CertOrder`]
//!
//! \* Possibly multiple auths.
//!
//! [`ApiOrder`]: ../api/struct.ApiOrder.html
//! [`NewOrder`]: struct.NewOrder.html
//! [`Auth`]: struct.Auth.html
//! [`Challenge`]: struct.Challenge.html
//! [`CsrOrder`]: struct.CsrOrder.html
//! [`CertOrder`]: struct.CertOrder.html
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use openssl::pkey::{PKey, Private};

use crate::acc::AccountInner;
use crate::api::{ApiAuth, ApiFinalize, ApiOrder, OrderStatus};
use crate::cert::{create_csr, Certificate};
use crate::poll::{PollOutcome, Poller};
use crate::req::req_safe_read_body;
use crate::util::{base64url, read_json};
use crate::{Error, Result};

mod auth;

pub use self::auth::{Auth, Challenge, ChallengeInstruction, ChallengeKind};

/// The order wrapped with an outer façade.
pub(crate) struct Order {
    inner: Arc<AccountInner>,
    api_order: ApiOrder,
    url: String,
}

impl Order {
    pub(crate) fn new(inner: &Arc<AccountInner>, api_order: ApiOrder, url: String) -> Self {
        Order {
            inner: inner.clone(),
            api_order,
            url,
        }
    }
}

/// Helper to refresh an order status (POST-as-GET).
///
/// When the previous status is known, the refreshed status must be a legal
/// successor; the CA moving an order backwards violates the protocol.
pub(crate) fn refresh_order(
    inner: &Arc<AccountInner>,
    url: String,
    prev_status: Option<OrderStatus>,
) -> Result<Order> {
    let res = inner.transport.call_get(&url)?;
    let api_order: ApiOrder = read_json(res)?;

    if let (Some(prev), Some(next)) = (prev_status, api_order.status) {
        if !prev.may_advance_to(next) {
            return Err(Error::Protocol(format!(
                "order status moved backwards: {:?} -> {:?}",
                prev, next
            )));
        }
    }

    Ok(Order {
        inner: inner.clone(),
        api_order,
        url,
    })
}

/// A new order created by [`Account::new_order`].
///
/// An order is created from one or many domains (the first becoming the
/// certificate `CN`). All domains in the order must have authorizations
/// (confirmed ownership) before the order can progress to submitting a CSR.
///
/// The ACME API provider might "remember" for a time that you already own a
/// domain, which means you might not need to prove the ownership every time.
/// Use appropriate methods to first check whether you really need to handle
/// authorizations.
///
/// [`Account::new_order`]: ../struct.Account.html#method.new_order
pub struct NewOrder {
    pub(crate) order: Order,
}

impl NewOrder {
    /// Tell if the domains in this order have been authorized.
    ///
    /// This doesn't do any calls against the API. You must manually call [`refresh`].
    ///
    /// In ACME API terms, the order can either be `ready` or `valid`, which both would
    /// mean we have passed the authorization stage.
    ///
    /// [`refresh`]: struct.NewOrder.html#method.refresh
    pub fn is_validated(&self) -> bool {
        self.order.api_order.is_status_ready() || self.order.api_order.is_status_valid()
    }

    /// If the order [`is_validated`] progress it to a [`CsrOrder`].
    ///
    /// This doesn't do any calls against the API. You must manually call [`refresh`].
    ///
    /// [`is_validated`]: struct.NewOrder.html#method.is_validated
    /// [`CsrOrder`]: struct.CsrOrder.html
    pub fn confirm_validations(&self) -> Option<CsrOrder> {
        if self.is_validated() {
            Some(CsrOrder {
                order: Order::new(
                    &self.order.inner,
                    self.order.api_order.clone(),
                    self.order.url.clone(),
                ),
            })
        } else {
            None
        }
    }

    /// Refresh the order state against the ACME API.
    ///
    /// The specification calls this a "POST-as-GET" against the order URL.
    pub fn refresh(&mut self) -> Result<()> {
        let order = refresh_order(
            &self.order.inner,
            self.order.url.clone(),
            self.order.api_order.status,
        )?;
        self.order = order;
        Ok(())
    }

    /// Provide the authorizations. The number of authorizations will be the
    /// same as the number of domains requested, one authorization per domain.
    ///
    /// If the order includes domain names that have been authorized before,
    /// this list might contain a mix of already valid and not yet valid auths.
    pub fn authorizations(&self) -> Result<Vec<Auth>> {
        let mut result = vec![];
        if let Some(authorizations) = &self.order.api_order.authorizations {
            for auth_url in authorizations {
                let res = self.order.inner.transport.call_get(auth_url)?;
                let api_auth: ApiAuth = read_json(res)?;
                result.push(Auth::new(api_auth, auth_url));
            }
        }
        Ok(result)
    }

    /// The order URL assigned by the CA.
    pub fn order_url(&self) -> &str {
        &self.order.url
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &ApiOrder {
        &self.order.api_order
    }
}

/// An order that is ready for a CSR submission.
///
/// To submit the CSR is called "finalizing" the order. The CSR is built
/// from the per-order private key and must cover exactly the identifier
/// set the order was created with; this is checked before signing rather
/// than left for the CA to reject.
pub struct CsrOrder {
    pub(crate) order: Order,
}

impl CsrOrder {
    /// Finalize the order with the per-order private key.
    ///
    /// The `requested_domains` are the names the caller asked a certificate
    /// for; they must equal the order's identifier set.
    ///
    /// Once the CSR has been submitted, the order goes into a `processing`
    /// status that is polled until the CA settles it one way or the other.
    pub fn finalize_key(
        self,
        requested_domains: &[&str],
        private_key: PKey<Private>,
        poller: &Poller,
        deadline: Option<Instant>,
    ) -> Result<CertOrder> {
        // the domains the CA has authorized
        let domains = self.order.api_order.domains();

        // reject a mismatched identifier set before anything is signed
        let requested: HashSet<&str> = requested_domains.iter().copied().collect();
        let ordered: HashSet<&str> = domains.iter().copied().collect();
        if requested != ordered {
            return Err(Error::Protocol(format!(
                "requested domains {:?} do not match order identifiers {:?}",
                requested_domains, domains
            )));
        }

        // csr from private key and authorized domains.
        let csr = create_csr(&private_key, &domains)?;

        // this is not the same as PEM.
        let csr_der = csr.to_der().expect("to_der()");
        let csr_enc = base64url(&csr_der);
        let finalize = ApiFinalize { csr: csr_enc };

        let inner = self.order.inner;
        let order_url = self.order.url;
        let finalize_url = &self.order.api_order.finalize;

        // if the CSR is invalid, we will get a 4xx code back that
        // bombs out from this call.
        inner.transport.call(finalize_url, &finalize)?;

        // wait for the status to settle.
        // valid -> cert is issued
        // invalid -> the whole thing is off
        let order = wait_for_order_status(&inner, &order_url, poller, deadline)?;

        if !order.api_order.is_status_valid() {
            let detail = order
                .api_order
                .error
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| format!("order is in status: {:?}", order.api_order.status));
            return Err(Error::Validation {
                domain: None,
                detail,
            });
        }

        Ok(CertOrder { private_key, order })
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &ApiOrder {
        &self.order.api_order
    }
}

fn wait_for_order_status(
    inner: &Arc<AccountInner>,
    url: &str,
    poller: &Poller,
    deadline: Option<Instant>,
) -> Result<Order> {
    let mut prev = None;
    poller.wait(deadline, || {
        let order = refresh_order(inner, url.to_string(), prev)?;
        prev = order.api_order.status;
        if order.api_order.is_status_valid() || order.api_order.is_status_invalid() {
            Ok(PollOutcome::Done(order))
        } else {
            Ok(PollOutcome::Retry)
        }
    })
}

/// Order for an issued certificate that is ready to download.
pub struct CertOrder {
    private_key: PKey<Private>,
    order: Order,
}

impl CertOrder {
    /// Request download of the issued certificate.
    ///
    /// The returned bundle holds the private key, the leaf certificate and
    /// the intermediate chain, all PEM. The leaf's subject alt names are
    /// checked against the order identifiers; a CA handing back the wrong
    /// certificate is a protocol violation, not something to pass along.
    pub fn download_cert(self) -> Result<Certificate> {
        let url = self
            .order
            .api_order
            .certificate
            .clone()
            .ok_or_else(|| Error::Protocol("valid order without certificate url".into()))?;

        let inner = self.order.inner;
        let res = inner.transport.call_get(&url)?;
        let full_chain = req_safe_read_body(res);

        let pkey_pem_bytes = self
            .private_key
            .private_key_to_pem_pkcs8()
            .expect("private_key_to_pem");
        let pkey_pem = String::from_utf8(pkey_pem_bytes).expect("pem utf8");

        let cert = Certificate::from_chain_pem(pkey_pem, full_chain)?;

        let mut got = cert.sans()?;
        got.sort();
        let mut want: Vec<String> = self
            .order
            .api_order
            .domains()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        want.sort();
        if got != want {
            return Err(Error::Protocol(format!(
                "issued certificate SAN set {:?} does not match order identifiers {:?}",
                got, want
            )));
        }

        Ok(cert)
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &ApiOrder {
        &self.order.api_order
    }
}

/// Reject empty lists, duplicates and syntactically invalid DNS names
/// before any network call.
pub(crate) fn validate_domains(domains: &[&str]) -> Result<()> {
    if domains.is_empty() {
        return Err(Error::InvalidInput("no domains provided".into()));
    }
    let mut seen = HashSet::new();
    for domain in domains {
        if !is_valid_dns_name(domain) {
            return Err(Error::InvalidInput(format!(
                "invalid domain name: {}",
                domain
            )));
        }
        if !seen.insert(domain.to_ascii_lowercase()) {
            return Err(Error::InvalidInput(format!("duplicate domain: {}", domain)));
        }
    }
    Ok(())
}

fn is_valid_dns_name(domain: &str) -> bool {
    // a wildcard is allowed only as the leftmost label
    let rest = domain.strip_prefix("*.").unwrap_or(domain);
    if rest.contains('*') || rest.is_empty() || rest.len() > 253 {
        return false;
    }
    let labels: Vec<&str> = rest.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return false;
        }
        let bytes = label.as_bytes();
        if !bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-') {
            return false;
        }
        if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
            return false;
        }
    }
    let tld = labels[labels.len() - 1];
    tld.len() >= 2 && tld.bytes().all(|b| b.is_ascii_alphabetic())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::*;
    use std::time::Duration;

    fn quick_poller() -> Poller {
        Poller::new(Duration::from_millis(5), Duration::from_secs(5))
    }

    #[test]
    fn test_get_authorizations() -> Result<()> {
        let server = crate::test::with_directory_server();
        let url = DirectoryUrl::Other(&server.dir_url);
        let dir = Directory::from_url(url)?;
        let acc = dir.register_account("foo@bar.com", crate::acc::AcmeKey::new())?;
        let ord = acc.new_order(&["test.sailmail.xyz"])?;
        let auths = ord.authorizations()?;
        assert_eq!(auths.len(), 1);
        Ok(())
    }

    #[test]
    fn test_finalize_and_download() -> Result<()> {
        let server = crate::test::with_directory_server();
        let url = DirectoryUrl::Other(&server.dir_url);
        let dir = Directory::from_url(url)?;
        let acc = dir.register_account("foo@bar.com", crate::acc::AcmeKey::new())?;
        let ord = acc.new_order(&["test.sailmail.xyz"])?;

        // shortcut auth
        let ord = CsrOrder { order: ord.order };
        let pkey = create_rsa_key(2048);
        let ord = ord.finalize_key(&["test.sailmail.xyz"], pkey, &quick_poller(), None)?;

        let cert = ord.download_cert()?;
        assert!(cert.certificate().contains("BEGIN CERTIFICATE"));
        assert!(cert.chain().contains("BEGIN CERTIFICATE"));
        assert!(!cert.private_key().is_empty());
        assert_eq!(cert.sans()?, vec!["test.sailmail.xyz".to_string()]);
        Ok(())
    }

    #[test]
    fn test_finalize_rejects_mismatched_domains() -> Result<()> {
        let server = crate::test::with_directory_server();
        let url = DirectoryUrl::Other(&server.dir_url);
        let dir = Directory::from_url(url)?;
        let acc = dir.register_account("foo@bar.com", crate::acc::AcmeKey::new())?;
        let ord = acc.new_order(&["test.sailmail.xyz"])?;

        let ord = CsrOrder { order: ord.order };
        let pkey = create_rsa_key(2048);
        let res = ord.finalize_key(&["other.example.com"], pkey, &quick_poller(), None);
        assert!(matches!(res, Err(Error::Protocol(_))));
        Ok(())
    }

    #[test]
    fn test_validate_domains() {
        assert!(validate_domains(&["example.com"]).is_ok());
        assert!(validate_domains(&["example.com", "www.example.com"]).is_ok());
        assert!(validate_domains(&["*.example.com"]).is_ok());

        assert!(validate_domains(&[]).is_err());
        assert!(validate_domains(&["example.com", "EXAMPLE.com"]).is_err());
        assert!(validate_domains(&["bare"]).is_err());
        assert!(validate_domains(&["-bad.example.com"]).is_err());
        assert!(validate_domains(&["bad-.example.com"]).is_err());
        assert!(validate_domains(&["exa mple.com"]).is_err());
        assert!(validate_domains(&["example.c"]).is_err());
        assert!(validate_domains(&["example.123"]).is_err());
        assert!(validate_domains(&["foo.*.example.com"]).is_err());
        assert!(validate_domains(&["1.2.3.4"]).is_err());
    }
}
