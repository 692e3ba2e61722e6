use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

#[derive(Debug)]
pub(crate) enum RequestFailure {
    Request(reqwest::Error),
    Api { status: StatusCode, body: String },
}

/// Sends one authenticated JSON POST. Single attempt; non-2xx statuses come
/// back as [`RequestFailure::Api`] with the body text.
pub(crate) async fn post_json<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    payload: &T,
    timeout_secs: Option<u64>,
) -> Result<reqwest::Response, RequestFailure> {
    let mut request = client.post(url).bearer_auth(api_key).json(payload);

    if let Some(timeout_secs) = timeout_secs {
        request = request.timeout(Duration::from_secs(timeout_secs));
    }

    debug!(url, "sending request");
    let response = request.send().await.map_err(RequestFailure::Request)?;
    let status = response.status();
    debug!(url, %status, "response received");

    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(RequestFailure::Api {
        status,
        body: truncate_body(body),
    })
}

const MAX_ERROR_BODY: usize = 2_000;

fn truncate_body(mut body: String) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut cut = MAX_ERROR_BODY;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    body.truncate(cut);
    body.push_str("...");
    body
}
