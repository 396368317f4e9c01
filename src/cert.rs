use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{self, PKey};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509NameBuilder, X509Req, X509ReqBuilder, X509};

use crate::{Error, Result};

/// Make an RSA private key (from which we can derive a public key).
///
/// This library does not check the number of bits used to create the key pair.
/// For Let's Encrypt, the bits must be between 2048 and 4096.
pub fn create_rsa_key(bits: u32) -> PKey<pkey::Private> {
    let pri_key_rsa = Rsa::generate(bits).expect("Rsa::generate");
    PKey::from_rsa(pri_key_rsa).expect("from_rsa")
}

pub(crate) fn create_csr(pkey: &PKey<pkey::Private>, domains: &[&str]) -> Result<X509Req> {
    //
    // the csr builder
    let mut req_bld = X509ReqBuilder::new().expect("X509ReqBuilder");

    // the first domain is the subject common name
    let mut name_bld = X509NameBuilder::new().expect("X509NameBuilder");
    name_bld
        .append_entry_by_nid(Nid::COMMONNAME, domains[0])
        .expect("append_entry_by_nid");
    let name = name_bld.build();
    req_bld.set_subject_name(&name).expect("set_subject_name");

    // set private/public key in builder
    req_bld.set_pubkey(pkey).expect("set_pubkey");

    // every domain, exactly once, as an alt name
    let mut stack = Stack::new().expect("Stack::new");
    let ctx = req_bld.x509v3_context(None);
    let mut an = SubjectAlternativeName::new();
    for domain in domains {
        an.dns(domain);
    }
    let ext = an.build(&ctx).expect("SubjectAlternativeName::build");
    stack.push(ext).expect("Stack::push");
    req_bld.add_extensions(&stack).expect("add_extensions");

    // sign it
    req_bld
        .sign(pkey, MessageDigest::sha256())
        .expect("csr_sign");

    // the csr
    Ok(req_bld.build())
}

/// Encapsulated certificate bundle: private key, leaf and intermediate
/// chain, all PEM encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    private_key: String,
    certificate: String,
    chain: String,
}

impl Certificate {
    /// Create a Certificate from its parts, useful when reading files
    /// manually from disk.
    ///
    /// NOTE: keys and certs should be PEM encoded.
    pub fn new(
        private_key: impl Into<String>,
        certificate: impl Into<String>,
        chain: impl Into<String>,
    ) -> Self {
        Self {
            private_key: private_key.into(),
            certificate: certificate.into(),
            chain: chain.into(),
        }
    }

    /// Split a downloaded full-chain PEM into leaf and intermediates.
    pub(crate) fn from_chain_pem(private_key: String, full_chain: String) -> Result<Certificate> {
        let (certificate, chain) = split_chain(&full_chain)?;
        Ok(Certificate {
            private_key,
            certificate,
            chain,
        })
    }

    /// The PEM encoded private key (PKCS#8).
    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    /// The private key as DER.
    pub fn private_key_der(&self) -> Vec<u8> {
        let pkey = PKey::private_key_from_pem(self.private_key.as_bytes()).expect("from_pem");
        pkey.private_key_to_der().expect("private_key_to_der")
    }

    /// The PEM encoded leaf certificate.
    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    /// The leaf certificate as DER.
    pub fn certificate_der(&self) -> Vec<u8> {
        let x509 = X509::from_pem(self.certificate.as_bytes()).expect("from_pem");
        x509.to_der().expect("to_der")
    }

    /// The PEM encoded intermediate/root chain. Empty when the CA returned
    /// only the leaf.
    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// The dNSName subject alt names of the leaf certificate.
    pub fn sans(&self) -> Result<Vec<String>> {
        san_set(&self.certificate)
    }

    /// Inspect the certificate to count the number of (whole) valid days left.
    ///
    /// It's up to the ACME API provider to decide how long an issued certificate is valid.
    /// Let's Encrypt sets the validity to 90 days. This function reports 89 days for newly
    /// issued cert, since it counts _whole_ days.
    ///
    /// It is possible to get negative days for an expired certificate.
    pub fn valid_days_left(&self) -> i64 {
        // load as x509
        let x509 = X509::from_pem(self.certificate.as_bytes()).expect("from_pem");

        // convert asn1 time to Tm
        let not_after = format!("{}", x509.not_after());
        // Display trait produces this format, which is kinda dumb.
        // Apr 19 08:48:46 2019 GMT
        let expires = parse_date(&not_after);
        let dur = expires - time::now();

        dur.num_days()
    }
}

/// First certificate in the PEM bundle is the leaf, the rest is the chain.
pub(crate) fn split_chain(pem: &str) -> Result<(String, String)> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";

    let mut starts: Vec<usize> = pem.match_indices(BEGIN).map(|(i, _)| i).collect();
    if starts.is_empty() {
        return Err(Error::Protocol("no certificate in CA response".into()));
    }
    starts.push(pem.len());

    let mut parts: Vec<String> = starts
        .windows(2)
        .map(|w| {
            let mut part = pem[w[0]..w[1]].trim_end().to_string();
            part.push('\n');
            part
        })
        .collect();

    let leaf = parts.remove(0);
    Ok((leaf, parts.concat()))
}

pub(crate) fn san_set(cert_pem: &str) -> Result<Vec<String>> {
    let x509 = X509::from_pem(cert_pem.as_bytes())
        .map_err(|e| Error::Protocol(format!("unparseable certificate: {}", e)))?;
    let mut sans = vec![];
    if let Some(names) = x509.subject_alt_names() {
        for name in names.iter() {
            if let Some(dns) = name.dnsname() {
                sans.push(dns.to_string());
            }
        }
    }
    Ok(sans)
}

fn parse_date(s: &str) -> time::Tm {
    debug!("Parse date/time: {}", s);
    time::strptime(s, "%h %e %H:%M:%S %Y %Z").expect("strptime")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{TEST_CERT_PEM, TEST_KEY_PEM};

    #[test]
    fn test_parse_date() {
        let x = parse_date("May  3 07:40:15 2019 GMT");
        assert_eq!(time::strftime("%F %T", &x).unwrap(), "2019-05-03 07:40:15");
    }

    #[test]
    fn test_create_csr_roundtrip() {
        let pkey = create_rsa_key(2048);
        let csr = create_csr(&pkey, &["example.com", "www.example.com"]).unwrap();
        let der = csr.to_der().unwrap();
        assert!(!der.is_empty());
        let pem = csr.to_pem().unwrap();
        let _ = X509Req::from_pem(&pem).unwrap();
    }

    #[test]
    fn test_split_chain() {
        let full = format!("{}{}", TEST_CERT_PEM, TEST_CERT_PEM);
        let (leaf, chain) = split_chain(&full).unwrap();
        assert_eq!(leaf.matches("BEGIN CERTIFICATE").count(), 1);
        assert_eq!(chain.matches("BEGIN CERTIFICATE").count(), 1);

        // leaf-only bundle leaves the chain empty
        let (leaf, chain) = split_chain(TEST_CERT_PEM).unwrap();
        assert_eq!(leaf.matches("BEGIN CERTIFICATE").count(), 1);
        assert!(chain.is_empty());
    }

    #[test]
    fn test_split_chain_requires_a_certificate() {
        assert!(split_chain("HELLO WORLD").is_err());
    }

    #[test]
    fn test_san_set() {
        let sans = san_set(TEST_CERT_PEM).unwrap();
        assert_eq!(sans, vec!["test.sailmail.xyz".to_string()]);
    }

    #[test]
    fn test_certificate_der_conversion() {
        let certificate = Certificate::new(TEST_KEY_PEM, TEST_CERT_PEM, "");

        assert_eq!(certificate.private_key(), TEST_KEY_PEM);
        assert_eq!(certificate.certificate(), TEST_CERT_PEM);

        // assert ssl DER conversion does not panic on valid data
        assert_eq!(certificate.private_key_der().len(), 167);
        assert_eq!(certificate.certificate_der().len(), 1200);
    }
}
