//
use std::sync::Arc;

use ureq::Agent;

use crate::acc::{AcmeKey, Account};
use crate::api::{ApiAccount, ApiDirectory};
use crate::req::{new_agent, req_expect_header, req_get, req_handle_error};
use crate::trans::{NoncePool, Transport};
use crate::util::read_json;
use crate::Result;

const LETSENCRYPT: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Enumeration of known ACME API directories.
#[derive(Debug, Clone)]
pub enum DirectoryUrl<'a> {
    /// The main Let's Encrypt directory. Not appropriate for testing and dev.
    LetsEncrypt,
    /// The staging Let's Encrypt directory. Use for testing and dev. Doesn't issue
    /// "valid" certificates. The root signing certificate is not supposed
    /// to be in any trust chains.
    LetsEncryptStaging,
    /// Provide an arbitrary directory URL to connect to.
    Other(&'a str),
}

impl<'a> DirectoryUrl<'a> {
    pub(crate) fn to_url(&self) -> &str {
        match self {
            DirectoryUrl::LetsEncrypt => LETSENCRYPT,
            DirectoryUrl::LetsEncryptStaging => LETSENCRYPT_STAGING,
            DirectoryUrl::Other(s) => s,
        }
    }
}

/// Entry point for accessing an ACME API.
///
/// The directory is fetched exactly once and is immutable for the session.
/// A resumed session rebuilds it from the persisted body via
/// the session flow instead of refetching.
#[derive(Clone)]
pub struct Directory {
    agent: Agent,
    nonce_pool: Arc<NoncePool>,
    api_directory: ApiDirectory,
}

impl Directory {
    /// Create a directory by fetching the directory url.
    pub fn from_url(url: DirectoryUrl) -> Result<Directory> {
        let agent = new_agent();
        let res = req_handle_error(req_get(&agent, url.to_url()))?;
        let api_directory: ApiDirectory = read_json(res)?;
        Ok(Self::from_api(agent, api_directory))
    }

    /// Rebuild a directory from an already fetched (persisted) body.
    pub(crate) fn from_api(agent: Agent, api_directory: ApiDirectory) -> Directory {
        let nonce_pool = Arc::new(NoncePool::new(agent.clone(), &api_directory.newNonce));
        Directory {
            agent,
            nonce_pool,
            api_directory,
        }
    }

    /// Register an account for the given key, or re-bind an existing one.
    ///
    /// Calling `newAccount` is idempotent per (CA, account key): for a key the
    /// CA has seen before, it responds 200 with the `Location` header set to
    /// the existing account URL instead of creating a new account. Either way
    /// the returned account signs all subsequent requests with `kid`.
    pub fn register_account(&self, contact_email: &str, acme_key: AcmeKey) -> Result<Account> {
        let acc = ApiAccount {
            contact: vec![format!("mailto:{}", contact_email)],
            termsOfServiceAgreed: Some(true),
            ..Default::default()
        };

        let mut transport = Transport::new(&self.nonce_pool, self.agent.clone(), acme_key);
        let res = transport.call_jwk(&self.api_directory.newAccount, &acc)?;
        let kid = req_expect_header(&res, "location")?;
        debug!("Key id is: {}", kid);
        // fill in the server returned key id
        transport.set_key_id(kid);

        let _api_account: ApiAccount = read_json(res)?;

        Ok(Account::new(transport, contact_email, self.api_directory.clone()))
    }

    /// Resume an account whose URL is already known. Skips `newAccount`
    /// entirely; the key must carry its key id.
    pub(crate) fn resume_account(&self, contact_email: &str, acme_key: AcmeKey) -> Account {
        let transport = Transport::new(&self.nonce_pool, self.agent.clone(), acme_key);
        Account::new(transport, contact_email, self.api_directory.clone())
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_directory(&self) -> &ApiDirectory {
        &self.api_directory
    }

    pub(crate) fn last_nonce(&self) -> Option<String> {
        self.nonce_pool.last_nonce()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_create_directory() -> Result<()> {
        let server = crate::test::with_directory_server();
        let url = DirectoryUrl::Other(&server.dir_url);
        let _ = Directory::from_url(url)?;
        Ok(())
    }

    #[test]
    fn test_register_account() -> Result<()> {
        let server = crate::test::with_directory_server();
        let url = DirectoryUrl::Other(&server.dir_url);
        let dir = Directory::from_url(url)?;
        let acc = dir.register_account("foo@bar.com", AcmeKey::new())?;
        assert!(acc.account_url().contains("/acme/acct/"));
        Ok(())
    }

    #[test]
    fn test_resume_account_skips_registration() -> Result<()> {
        let server = crate::test::with_directory_server();
        let url = DirectoryUrl::Other(&server.dir_url);
        let dir = Directory::from_url(url)?;
        let acc = dir.register_account("foo@bar.com", AcmeKey::new())?;

        let mut key = AcmeKey::from_pem(acc.acme_private_key_pem().as_bytes())?;
        key.set_key_id(acc.account_url().to_string());
        let resumed = dir.resume_account("foo@bar.com", key);

        assert_eq!(resumed.account_url(), acc.account_url());
        assert_eq!(resumed.acme_private_key_pem(), acc.acme_private_key_pem());
        Ok(())
    }
}
