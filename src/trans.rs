use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use ureq::{Agent, Response};

use crate::acc::AcmeKey;
use crate::api::ApiEmptyString;
use crate::jwt::{jws_with_jwk, jws_with_kid};
use crate::req::{problem_of, req_expect_header, req_handle_error, req_head, req_post};
use crate::{Error, Result};

/// JWS payload and nonce handling for requests to the API.
///
/// Setup is:
///
/// 1. `Transport::new()`
/// 2. `call_jwk()` against the newAccount url
/// 3. `set_key_id()` from the returned `Location` header.
/// 4. `call()` for all calls after that.
#[derive(Clone)]
pub(crate) struct Transport {
    acme_key: AcmeKey,
    agent: Agent,
    nonce_pool: Arc<NoncePool>,
}

impl Transport {
    pub fn new(nonce_pool: &Arc<NoncePool>, agent: Agent, acme_key: AcmeKey) -> Self {
        Transport {
            acme_key,
            agent,
            nonce_pool: nonce_pool.clone(),
        }
    }

    /// Update the key id once it is known (part of setting up the transport).
    pub fn set_key_id(&mut self, kid: String) {
        self.acme_key.set_key_id(kid);
    }

    /// The key used in the transport.
    pub fn acme_key(&self) -> &AcmeKey {
        &self.acme_key
    }

    /// Make call using the full jwk. Only for the first newAccount request.
    pub fn call_jwk<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<Response> {
        self.do_call(url, body, jws_with_jwk)
    }

    /// Make call using the key id.
    pub fn call<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<Response> {
        self.do_call(url, body, jws_with_kid)
    }

    /// POST-as-GET against a resource url.
    pub fn call_get(&self, url: &str) -> Result<Response> {
        self.call(url, &ApiEmptyString)
    }

    fn do_call<T: Serialize + ?Sized, F: Fn(&str, String, &AcmeKey, &T) -> Result<String>>(
        &self,
        url: &str,
        body: &T,
        make_body: F,
    ) -> Result<Response> {
        // The ACME API may at any point invalidate all nonces. If we detect
        // such an error, we loop until the server accepts the nonce.
        loop {
            // Every signed request consumes a nonce of its own, acquired
            // immediately before signing. Nonces are never shared in flight.
            let nonce = self.nonce_pool.get_nonce()?;

            // Sign the body.
            let body = make_body(url, nonce, &self.acme_key, body)?;

            debug!("Call endpoint {}", url);

            match req_post(&self.agent, url, &body) {
                Ok(res) => {
                    self.nonce_pool.extract_nonce(&res);
                    return Ok(res);
                }
                Err(ureq::Error::Status(_, res)) => {
                    // Regardless of the request being a success or not, there
                    // might be a nonce in the response.
                    self.nonce_pool.extract_nonce(&res);

                    let problem = problem_of(res);
                    if problem.is_bad_nonce() {
                        // retry the request with a new nonce.
                        debug!("Retrying on bad nonce");
                        continue;
                    }
                    return Err(problem.into());
                }
                Err(ureq::Error::Transport(transport)) => {
                    return Err(Error::Transient(transport.to_string()));
                }
            }
        }
    }
}

/// Shared pool of nonces.
///
/// Replenished from the `Replay-Nonce` header of every response passing
/// through the transport; refilled from the newNonce endpoint when empty.
pub(crate) struct NoncePool {
    nonce_url: String,
    agent: Agent,
    pool: Mutex<VecDeque<String>>,
}

impl NoncePool {
    pub fn new(agent: Agent, nonce_url: &str) -> Self {
        NoncePool {
            nonce_url: nonce_url.into(),
            agent,
            pool: Mutex::new(VecDeque::new()),
        }
    }

    pub fn extract_nonce(&self, res: &Response) {
        if let Some(nonce) = res.header("replay-nonce") {
            trace!("Extract nonce");
            let mut pool = self.pool.lock().unwrap();
            pool.push_back(nonce.to_string());
            if pool.len() > 10 {
                pool.pop_front();
            }
        }
    }

    /// The most recently banked nonce, if any. For session bookkeeping only,
    /// a resumed session always refetches before signing.
    pub fn last_nonce(&self) -> Option<String> {
        self.pool.lock().unwrap().back().cloned()
    }

    fn get_nonce(&self) -> Result<String> {
        {
            let mut pool = self.pool.lock().unwrap();
            if let Some(nonce) = pool.pop_front() {
                trace!("Use previous nonce");
                return Ok(nonce);
            }
        }
        debug!("Request new nonce");
        let res = req_handle_error(req_head(&self.agent, &self.nonce_url))?;
        req_expect_header(&res, "replay-nonce")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::req::new_agent;

    #[test]
    fn test_nonces_are_single_use() {
        let server = crate::test::with_directory_server();
        let nonce_url = format!("{}/acme/new-nonce", server.url);
        let pool = NoncePool::new(new_agent(), &nonce_url);

        // the test server hands out counting nonces, so two fetches from an
        // empty pool must never return the same value
        let first = pool.get_nonce().unwrap();
        let second = pool.get_nonce().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_pool_reuses_banked_nonce_once() {
        let server = crate::test::with_directory_server();
        let nonce_url = format!("{}/acme/new-nonce", server.url);
        let pool = NoncePool::new(new_agent(), &nonce_url);

        let res = crate::req::req_head(&new_agent(), &nonce_url).unwrap();
        pool.extract_nonce(&res);
        let banked = res.header("replay-nonce").unwrap().to_string();

        assert_eq!(pool.last_nonce(), Some(banked.clone()));
        // banked nonce is consumed exactly once
        assert_eq!(pool.get_nonce().unwrap(), banked);
        assert_ne!(pool.get_nonce().unwrap(), banked);
    }
}
