//
use std::sync::Arc;

use crate::api::{ApiDirectory, ApiIdentifier, ApiOrder};
use crate::order::{validate_domains, NewOrder, Order};
use crate::req::req_expect_header;
use crate::trans::Transport;
use crate::util::read_json;
use crate::Result;

mod akey;

pub(crate) use self::akey::AcmeKey;

pub(crate) struct AccountInner {
    pub transport: Transport,
    pub contact_email: String,
    pub api_directory: ApiDirectory,
}

/// Account with an ACME provider.
///
/// Accounts are created (or resumed) through [`Directory`] and consist of a
/// contact email address and an RSA private key for signing requests to the
/// ACME API. The key does not constrain the algorithm of the certificates
/// being issued; each order carries a key pair of its own.
///
/// [`Directory`]: struct.Directory.html
#[derive(Clone)]
pub struct Account {
    inner: Arc<AccountInner>,
}

impl Account {
    pub(crate) fn new(
        transport: Transport,
        contact_email: &str,
        api_directory: ApiDirectory,
    ) -> Self {
        Account {
            inner: Arc::new(AccountInner {
                transport,
                contact_email: contact_email.into(),
                api_directory,
            }),
        }
    }

    /// Private key for this account, PKCS#8 PEM.
    pub fn acme_private_key_pem(&self) -> String {
        self.inner.transport.acme_key().to_pem()
    }

    /// Contact email for this account.
    pub fn contact_email(&self) -> &str {
        &self.inner.contact_email
    }

    /// The account URL the CA assigned at registration. Doubles as the
    /// `kid` in every signed request.
    pub fn account_url(&self) -> &str {
        self.inner.transport.acme_key().key_id()
    }

    /// Create a new order to issue a certificate for this account.
    ///
    /// The first domain becomes the certificate's `CN`, all domains become
    /// subject alt names. The set is fixed at creation: the CSR submitted at
    /// finalize time must list exactly these names.
    ///
    /// Domains are validated before any network call: the list must be
    /// non-empty, each name syntactically valid, and free of duplicates.
    pub fn new_order(&self, domains: &[&str]) -> Result<NewOrder> {
        validate_domains(domains)?;

        let order = ApiOrder {
            identifiers: domains
                .iter()
                .map(|s| ApiIdentifier {
                    _type: "dns".into(),
                    value: s.to_string(),
                })
                .collect(),
            ..Default::default()
        };

        let new_order_url = &self.inner.api_directory.newOrder;

        let res = self.inner.transport.call(new_order_url, &order)?;
        let order_url = req_expect_header(&res, "location")?;
        let api_order: ApiOrder = read_json(res)?;

        let order = Order::new(&self.inner, api_order, order_url);
        Ok(NewOrder { order })
    }

    /// Rebuild an order facade from persisted state, without touching the API.
    pub(crate) fn resume_order(&self, api_order: ApiOrder, url: String) -> NewOrder {
        NewOrder {
            order: Order::new(&self.inner, api_order, url),
        }
    }

    pub(crate) fn acme_key(&self) -> &AcmeKey {
        self.inner.transport.acme_key()
    }

    pub(crate) fn transport(&self) -> &Transport {
        &self.inner.transport
    }
}

#[cfg(test)]
mod test {
    use crate::*;

    #[test]
    fn test_create_order() -> Result<()> {
        let server = crate::test::with_directory_server();
        let url = DirectoryUrl::Other(&server.dir_url);
        let dir = Directory::from_url(url)?;
        let acc = dir.register_account("foo@bar.com", crate::acc::AcmeKey::new())?;
        let _ = acc.new_order(&["test.sailmail.xyz"])?;
        Ok(())
    }

    #[test]
    fn test_order_rejects_bad_input() -> Result<()> {
        let server = crate::test::with_directory_server();
        let url = DirectoryUrl::Other(&server.dir_url);
        let dir = Directory::from_url(url)?;
        let acc = dir.register_account("foo@bar.com", crate::acc::AcmeKey::new())?;

        assert!(matches!(acc.new_order(&[]), Err(Error::InvalidInput(_))));
        assert!(matches!(
            acc.new_order(&["a.com", "a.com"]),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            acc.new_order(&["not_a_domain"]),
            Err(Error::InvalidInput(_))
        ));
        Ok(())
    }
}
