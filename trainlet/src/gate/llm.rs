//! LLM-mediated review gate.
//!
//! Sends the whole notebook's code plus the dataset folder names (never file
//! contents) to an external completion service and parses its raw text reply
//! under a strict two-branch grammar: `Approved` or `Rejected: <reason>`.
//! Anything else fails closed.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use super::{Gate, GateError, Verdict};
use crate::notebook::Cell;
use crate::version::TRAINLET_VERSION;

/// Fixed reviewer policy sent with every request.
const REVIEW_POLICY: &str = "You review one notebook cell for a collaborative \
training platform where data providers contribute private datasets. Approve \
training code that never reads, displays, or exports raw per-sample data; \
reject anything else. Reply for the target cell only, with exactly \
`Approved` or `Rejected: <reason>`.";

#[derive(Debug, Serialize)]
struct ReviewCell<'a> {
    cell_id: Uuid,
    code: &'a str,
}

#[derive(Debug, Serialize)]
struct ReviewRequest<'a> {
    system: &'static str,
    cells: Vec<ReviewCell<'a>>,
    target_cell_id: Uuid,
    dataset_folders: &'a [String],
}

pub struct LlmGate {
    url: String,
    client: reqwest::Client,
}

impl LlmGate {
    pub fn new(url: String, auth_token: Option<String>) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();

        if let Some(token) = auth_token
            && let Ok(value) = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
        {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let user_agent = format!("trainlet/{}", TRAINLET_VERSION);
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&user_agent) {
            headers.insert(reqwest::header::USER_AGENT, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self { url, client }
    }
}

#[async_trait]
impl Gate for LlmGate {
    async fn evaluate(
        &self,
        cells: &[Cell],
        target: &Cell,
        dataset_folders: &[String],
    ) -> Result<Verdict, GateError> {
        let request = ReviewRequest {
            system: REVIEW_POLICY,
            cells: cells
                .iter()
                .filter(|c| c.is_code())
                .map(|c| ReviewCell {
                    cell_id: c.cell_id,
                    code: &c.code,
                })
                .collect(),
            target_cell_id: target.cell_id,
            dataset_folders,
        };

        let response = self.client.post(&self.url).json(&request).send().await?;
        let raw = response.text().await?;
        tracing::debug!(cell_id = %target.cell_id, reply = %raw.trim(), "Gate reviewer replied");
        Ok(parse_verdict(&raw))
    }
}

/// Two-branch grammar, case-insensitive on the leading keyword. A bare
/// `Rejected` without a reason still rejects; any other shape fails closed.
fn parse_verdict(raw: &str) -> Verdict {
    let trimmed = raw.trim();
    let lowered = trimmed.to_lowercase();

    if lowered.starts_with("approved") {
        Verdict::Approved
    } else if lowered.starts_with("rejected") {
        let reason = trimmed
            .splitn(2, ':')
            .nth(1)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or("No reason provided.");
        Verdict::Rejected(reason.to_string())
    } else {
        Verdict::Rejected("invalid gate response".to_string())
    }
}
