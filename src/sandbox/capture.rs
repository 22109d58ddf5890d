//! Response Capture & Marshaller (§4.3): interprets sandbox stdout either as
//! a structured HTTP envelope or, failing that, as raw text.

use super::truncate_captured;
use crate::model::{CaptureOutcome, EnvelopeBody, HttpEnvelope};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Deserialize)]
struct RawEnvelope {
    status: i64,
    #[serde(default)]
    headers: HashMap<String, String>,
    body: Value,
}

/// Parse raw sandbox stdout bytes into a `CaptureOutcome`, per §4.3.
///
/// A `CaptureMalformed` condition (§7) is not an error — it simply falls
/// back to `CaptureOutcome::Raw`, which is why this function returns the
/// outcome directly rather than a `Result`.
pub fn capture_stdout(stdout_bytes: &[u8]) -> CaptureOutcome {
    let text = String::from_utf8_lossy(stdout_bytes).into_owned();

    if let Some(envelope) = try_parse_envelope(&text) {
        return CaptureOutcome::Envelope(envelope);
    }

    CaptureOutcome::Raw(truncate_captured(&text))
}

fn try_parse_envelope(text: &str) -> Option<HttpEnvelope> {
    let raw: RawEnvelope = serde_json::from_str(text.trim()).ok()?;

    if !(100..=599).contains(&raw.status) {
        return None;
    }
    let status_code = raw.status as u16;

    let body = match raw.body {
        // §4.3 step 2: if the body is itself a JSON-encoded string, attempt
        // one further parse to produce a structured body; on failure keep
        // it as plain text.
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed) => EnvelopeBody::Structured(parsed),
            Err(_) => EnvelopeBody::Text(s),
        },
        other => EnvelopeBody::Structured(other),
    };

    let body = truncate_body(body);

    Some(HttpEnvelope {
        status_code,
        headers: raw.headers,
        body,
    })
}

fn truncate_body(body: EnvelopeBody) -> EnvelopeBody {
    match body {
        EnvelopeBody::Text(s) => EnvelopeBody::Text(truncate_captured(&s)),
        structured => structured,
    }
}
