use std::time::Duration;

use ureq::{Agent, AgentBuilder, Response};

use crate::api::ApiProblem;
use crate::{Error, Result};

const TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn new_agent() -> Agent {
    let builder = AgentBuilder::new()
        .timeout_connect(TIMEOUT)
        .timeout_read(TIMEOUT)
        .timeout_write(TIMEOUT);
    // Under `cargo test` the in-process hyper 0.12 mock server closes idle
    // keep-alive connections during the slow crypto gaps between requests. When
    // ureq reuses such a pooled socket this surfaces as a spurious connection
    // reset. Disable connection pooling for test builds only; the shipped
    // client keeps ureq's default pooling behavior unchanged.
    #[cfg(test)]
    let builder = builder.max_idle_connections(0);
    builder.build()
}

pub(crate) fn req_get(agent: &Agent, url: &str) -> std::result::Result<Response, ureq::Error> {
    trace!("GET {}", url);
    agent.get(url).call()
}

pub(crate) fn req_head(agent: &Agent, url: &str) -> std::result::Result<Response, ureq::Error> {
    trace!("HEAD {}", url);
    agent.head(url).call()
}

pub(crate) fn req_post(
    agent: &Agent,
    url: &str,
    body: &str,
) -> std::result::Result<Response, ureq::Error> {
    trace!("POST {} {}", url, body);
    agent
        .post(url)
        .set("content-type", "application/jose+json")
        .send_string(body)
}

/// Turn error responses into the crate taxonomy. Transport failures are
/// retryable, HTTP error statuses become [`ApiProblem`]s first so the
/// problem type decides the error kind.
pub(crate) fn req_handle_error(
    result: std::result::Result<Response, ureq::Error>,
) -> Result<Response> {
    match result {
        Ok(res) => Ok(res),
        Err(ureq::Error::Status(_, res)) => Err(problem_of(res).into()),
        Err(ureq::Error::Transport(transport)) => Err(Error::Transient(transport.to_string())),
    }
}

pub(crate) fn problem_of(res: Response) -> ApiProblem {
    let status = res.status();
    if res.content_type() == "application/problem+json" {
        // if we were sent a problem+json, deserialize it
        let body = req_safe_read_body(res);
        serde_json::from_str(&body).unwrap_or_else(|e| ApiProblem {
            _type: "problemJsonFail".into(),
            detail: Some(format!(
                "failed to deserialize application/problem+json ({}) body: {}",
                e, body
            )),
            subproblems: None,
        })
    } else {
        // some other problem
        let status_line = format!("{} {}", status, res.status_text());
        let body = req_safe_read_body(res);
        ApiProblem {
            // a plain 429 without a problem document is still rate limiting
            _type: if status == 429 {
                "rateLimited".into()
            } else {
                "httpReqError".into()
            },
            detail: Some(format!("{} body: {}", status_line, body)),
            subproblems: None,
        }
    }
}

pub(crate) fn req_expect_header(res: &Response, name: &str) -> Result<String> {
    res.header(name)
        .map(|v| v.to_string())
        .ok_or_else(|| Error::Protocol(format!("missing header: {}", name)))
}

pub(crate) fn req_safe_read_body(res: Response) -> String {
    // the CA sometimes closes the TLS connection abruptly even though
    // the body was fully delivered.
    res.into_string().unwrap_or_default()
}
