use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HOST};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::session::Session;
use crate::Error;

/// How often the waiting flow re-checks the session flags while the
/// outbound call is in flight.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One outbound HTTP-shaped command, treated as opaque beyond the tuple.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Forwards one command to the session's bound endpoint.
///
/// The network call runs on a spawned task; the caller polls the session
/// flags every [`POLL_INTERVAL`] instead of awaiting the call directly, so a
/// timeout or close observed mid-flight yields a synthesized 500 and the
/// call's eventual result is abandoned (the task is not force-killed, its
/// output is discarded). A completed call is relayed verbatim; transport
/// errors are re-raised untouched.
pub async fn forward(
    session: &Session,
    client: &reqwest::Client,
    port: u16,
    request: RequestSpec,
) -> Result<ProxyResponse, Error> {
    let endpoint_ip = session.endpoint_ip().ok_or_else(|| {
        Error::InvalidTransition(format!(
            "session {} has no endpoint bound",
            session.id()
        ))
    })?;

    session.restart_timer();
    let control_line = format!("{} {}", request.method, request.path);
    session
        .audit()
        .append_step(
            session.id(),
            &control_line,
            &String::from_utf8_lossy(&request.body),
        )
        .await;

    let mut headers = request.headers.clone();
    headers.remove(HOST);
    let url = format!("http://{}:{}{}", endpoint_ip, port, request.path);
    let builder = client
        .request(request.method.clone(), &url)
        .headers(headers)
        .body(request.body.clone());

    let mut call = tokio::spawn(async move {
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok::<ProxyResponse, reqwest::Error>(ProxyResponse {
            status,
            headers,
            body,
        })
    });

    let response = loop {
        if session.is_timeouted() {
            break synthesized("Session timeouted");
        }
        if session.is_closed() {
            break synthesized("Session closed");
        }
        if call.is_finished() {
            match (&mut call).await {
                Ok(Ok(response)) => break response,
                Ok(Err(err)) => return Err(Error::Transport(err)),
                Err(err) => {
                    return Err(Error::Internal(format!("proxy worker failed: {err}")))
                }
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    // Parsed opportunistically for logging only; the caller always gets the
    // raw bytes.
    let logged_body = match serde_json::from_slice::<Value>(&response.body) {
        Ok(content) if content.get("screenshot").is_some() => String::new(),
        Ok(_) => String::from_utf8_lossy(&response.body).into_owned(),
        Err(_) => {
            debug!(
                session = %session.id(),
                "could not parse proxied response body as json"
            );
            String::from_utf8_lossy(&response.body).into_owned()
        }
    };
    session
        .audit()
        .append_step(session.id(), &response.status.to_string(), &logged_body)
        .await;

    Ok(response)
}

fn synthesized(reason: &str) -> ProxyResponse {
    let body = serde_json::json!({ "status": 1, "value": reason }).to_string();
    ProxyResponse {
        status: 500,
        headers: HeaderMap::new(),
        body: Bytes::from(body),
    }
}
