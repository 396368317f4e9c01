extern crate acme_twostep;

use std::io::{stdin, BufRead};

use acme_twostep::session::FileStore;
use acme_twostep::{ChallengeInstruction, ChallengeKind, DirectoryUrl, Issuer, IssuerConfig};

// Issue a certificate for $DOMAIN (and optionally $ALT_DOMAIN) against the
// Let's Encrypt staging environment, publishing the http-01 files by hand.
//
// Run it twice: the first run prints the files to publish and a request id,
// the second run (RESUME=<request id>) verifies and downloads the bundle.
// Both runs work from a fresh process; the state in between lives in
// ./acme-session-*.json.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let email = std::env::var("EMAIL")?; // required
    let domain = std::env::var("DOMAIN")?; // required
    let alt = std::env::var("ALT_DOMAIN"); // optional

    let config = IssuerConfig::new(DirectoryUrl::LetsEncryptStaging);
    let store = FileStore::new(".");
    let issuer = Issuer::new(config, store);

    let request_id = match std::env::var("RESUME") {
        Ok(id) => id,
        Err(_) => {
            let mut domains = vec![domain.as_str()];
            if let Ok(alt) = &alt {
                domains.push(alt.as_str());
            }

            let start = issuer.begin_issuance(&domains, &email, ChallengeKind::Http01)?;

            println!("request id: {}", start.request_id);
            for challenge in &start.challenges {
                if let ChallengeInstruction::Http01 {
                    domain,
                    file_path,
                    file_content,
                } = challenge
                {
                    println!();
                    println!("for {}, serve the file", domain);
                    println!("  http://{}{}", domain, file_path);
                    println!("with content");
                    println!("  {}", file_content);
                }
            }
            println!();
            println!("publish the files, then press enter (or re-run with RESUME={})",
                start.request_id);
            let mut line = String::new();
            stdin().lock().read_line(&mut line)?;
            start.request_id
        }
    };

    let outcome = issuer.check_and_finalize(&request_id)?;

    if outcome.success {
        let cert = outcome.certificate.expect("certificate");
        println!("issued, {} days left", cert.valid_days_left());
        println!("{}", cert.certificate());
        println!("{}", cert.chain());
    } else {
        for result in &outcome.results {
            println!("{}: {}", result.domain, result.message);
            if let Some(expected) = &result.expected {
                println!("  still expected: {:?}", expected);
            }
        }
        println!("fix the domains above and re-run with RESUME={}", request_id);
    }

    Ok(())
}
