use openssl::hash::MessageDigest;
use openssl::sha::sha256;
use openssl::sign::Signer;
use serde::{Deserialize, Serialize};

use crate::acc::AcmeKey;
use crate::util::base64url;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Default)]
pub(crate) struct JwsProtected {
    alg: String,
    url: String,
    nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl JwsProtected {
    fn new_jwk(jwk: Jwk, url: &str, nonce: String) -> Self {
        JwsProtected {
            alg: "RS256".into(),
            url: url.into(),
            nonce,
            jwk: Some(jwk),
            ..Default::default()
        }
    }
    fn new_kid(kid: &str, url: &str, nonce: String) -> Self {
        JwsProtected {
            alg: "RS256".into(),
            url: url.into(),
            nonce,
            kid: Some(kid.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct Jwk {
    alg: String,
    e: String,
    kty: String,
    n: String,
    #[serde(rename = "use")]
    _use: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
// LEXICAL ORDER OF FIELDS MATTER!
struct JwkThumb {
    e: String,
    kty: String,
    n: String,
}

impl From<&AcmeKey> for Jwk {
    fn from(a: &AcmeKey) -> Self {
        let rsa = a.private_key().rsa().expect("rsa");
        Jwk {
            alg: "RS256".into(),
            e: base64url(&rsa.e().to_vec()),
            kty: "RSA".into(),
            n: base64url(&rsa.n().to_vec()),
            _use: "sig".into(),
        }
    }
}

impl From<&Jwk> for JwkThumb {
    fn from(a: &Jwk) -> Self {
        JwkThumb {
            e: a.e.clone(),
            kty: a.kty.clone(),
            n: a.n.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Jws {
    protected: String,
    payload: String,
    signature: String,
}

pub(crate) fn jws_with_kid<T: Serialize + ?Sized>(
    url: &str,
    nonce: String,
    key: &AcmeKey,
    payload: &T,
) -> Result<String> {
    let protected = JwsProtected::new_kid(key.key_id(), url, nonce);
    jws_with(protected, key, payload)
}

pub(crate) fn jws_with_jwk<T: Serialize + ?Sized>(
    url: &str,
    nonce: String,
    key: &AcmeKey,
    payload: &T,
) -> Result<String> {
    let jwk: Jwk = key.into();
    let protected = JwsProtected::new_jwk(jwk, url, nonce);
    jws_with(protected, key, payload)
}

fn jws_with<T: Serialize + ?Sized>(
    protected: JwsProtected,
    key: &AcmeKey,
    payload: &T,
) -> Result<String> {
    let protected = {
        let pro_json = serde_json::to_string(&protected)?;
        base64url(pro_json.as_bytes())
    };
    let payload = {
        let pay_json = serde_json::to_string(payload)?;
        if pay_json == "\"\"" {
            // This is a special case produced by ApiEmptyString and should
            // not be further base64url encoded.
            "".to_string()
        } else {
            base64url(pay_json.as_bytes())
        }
    };

    let to_sign = format!("{}.{}", protected, payload);
    let mut signer =
        Signer::new(MessageDigest::sha256(), key.private_key()).expect("Signer::new");
    signer.update(to_sign.as_bytes()).expect("Signer::update");
    let signature = base64url(&signer.sign_to_vec().expect("sign_to_vec"));

    let jws = Jws {
        protected,
        payload,
        signature,
    };

    Ok(serde_json::to_string(&jws)?)
}

/// `token + "." + thumbprint`, optionally hashed once more for DNS records.
pub(crate) fn key_authorization(token: &str, key: &AcmeKey, extra_sha256: bool) -> String {
    let jwk: Jwk = key.into();
    let jwk_thumb: JwkThumb = (&jwk).into();
    let jwk_json = serde_json::to_string(&jwk_thumb).expect("jwk_thumb");
    let digest = base64url(&sha256(jwk_json.as_bytes()));
    let key_auth = format!("{}.{}", token, digest);
    if extra_sha256 {
        base64url(&sha256(key_auth.as_bytes()))
    } else {
        key_auth
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use openssl::sign::Verifier;

    #[test]
    fn test_jws_roundtrip_verifies_with_public_key() {
        let key = AcmeKey::new();
        let payload = serde_json::json!({ "csr": "ZmFrZQ" });

        let jws_json = jws_with_jwk("https://example.com/acme/x", "nonce-1".into(), &key, &payload)
            .unwrap();
        let jws: Jws = serde_json::from_str(&jws_json).unwrap();

        // signature is over protected || "." || payload
        let to_verify = format!("{}.{}", jws.protected, jws.payload);
        let signature = URL_SAFE_NO_PAD.decode(jws.signature.as_bytes()).unwrap();

        let mut verifier =
            Verifier::new(MessageDigest::sha256(), key.private_key()).unwrap();
        verifier.update(to_verify.as_bytes()).unwrap();
        assert!(verifier.verify(&signature).unwrap());

        // payload decodes to the original json
        let decoded = URL_SAFE_NO_PAD.decode(jws.payload.as_bytes()).unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_protected_header_carries_nonce_and_url() {
        let key = AcmeKey::new();
        let jws_json =
            jws_with_jwk("https://example.com/acme/new-acct", "nonce-7".into(), &key, &()).unwrap();
        let jws: Jws = serde_json::from_str(&jws_json).unwrap();
        let protected = URL_SAFE_NO_PAD.decode(jws.protected.as_bytes()).unwrap();
        let protected: serde_json::Value = serde_json::from_slice(&protected).unwrap();
        assert_eq!(protected["alg"], "RS256");
        assert_eq!(protected["nonce"], "nonce-7");
        assert_eq!(protected["url"], "https://example.com/acme/new-acct");
        assert_eq!(protected["jwk"]["kty"], "RSA");
        assert!(protected.get("kid").is_none());
    }

    #[test]
    fn test_key_authorization_is_deterministic() {
        let key = AcmeKey::new();
        let a = key_authorization("tok", &key, false);
        let b = key_authorization("tok", &key, false);
        assert_eq!(a, b);
        assert!(a.starts_with("tok."));

        // a different key yields a different thumbprint
        let other = AcmeKey::new();
        assert_ne!(a, key_authorization("tok", &other, false));
    }

    #[test]
    fn test_dns_proof_is_hashed_key_authorization() {
        let key = AcmeKey::new();
        let key_auth = key_authorization("tok", &key, false);
        let expect = base64url(&sha256(key_auth.as_bytes()));
        assert_eq!(key_authorization("tok", &key, true), expect);
        // sha256 digests encode to 43 chars without padding
        assert_eq!(expect.len(), 43);
    }
}
