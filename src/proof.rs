//! Receipt Proof Client
//!
//! Requests a cross-chain receipt proof for a mined transaction and polls the
//! proof service until the job resolves.
//!
//! ## State machine
//!
//! ```text
//! request ──> jobId ──> query ─┬─ pending ──(interval)──> query ... (max_attempts)
//!                              ├─ complete ──> ReceiptProof
//!                              └─ error ─────> ProofGenerationFailed
//! attempts exhausted ──> ProofPollingTimedOut
//! ```

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{SettlerError, SettlerResult};

pub const REQUEST_PROOF_METHOD: &str = "receipt_requestProof";
pub const QUERY_PROOF_METHOD: &str = "receipt_queryProof";

/// Default delay between two queries of the same job
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Default number of queries before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Identifies the transaction to prove: it was included on `src_chain_id` and the
/// proof will be verified on `dst_chain_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRequest {
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub block_number: u64,
    pub tx_index: u64,
}

/// Job identifier returned by the proof service, kept in its wire form
/// (the service may use numbers or strings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub serde_json::Value);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            serde_json::Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}

/// Job status reported by a query. Unknown in-progress states count as pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofStatus {
    Complete,
    Error,
    #[serde(other)]
    Pending,
}

/// Result of one `receipt_queryProof` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofQueryResult {
    pub status: ProofStatus,
    /// Base64 proof, present once complete
    #[serde(default)]
    pub proof: Option<String>,
}

/// A resolved receipt proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptProof {
    pub job_id: JobId,
    /// Proof as returned by the service
    pub encoded: String,
    /// Decoded bytes, ready for submission on chain
    pub proof: Vec<u8>,
}

impl ReceiptProof {
    pub fn proof_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.proof))
    }
}

/// Decodes the service's base64 proof into raw bytes.
pub fn decode_proof(encoded: &str) -> SettlerResult<Vec<u8>> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| SettlerError::rpc(QUERY_PROOF_METHOD, format!("proof is not base64: {}", e)))
}

/// Transport to the proof service.
#[async_trait]
pub trait ProofTransport: Send + Sync {
    /// Starts a proof job.
    async fn request_proof(&self, request: &ProofRequest) -> SettlerResult<JobId>;

    /// Reads the current state of a job.
    async fn query_proof(&self, job_id: &JobId) -> SettlerResult<ProofQueryResult>;
}

// ============================================================================
// HTTP TRANSPORT
// ============================================================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// JSON-RPC client of the proof service, authenticated with a bearer token.
#[derive(Debug, Clone)]
pub struct ProofApiClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl ProofApiClient {
    /// Creates a client for the proof service at `endpoint`.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Proof service URL
    /// * `api_key` - Bearer token sent on every request
    pub fn new(endpoint: &str, api_key: &str) -> SettlerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()
            .map_err(|e| SettlerError::rpc("client", e))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn call(&self, method: &str, params: Vec<serde_json::Value>) -> SettlerResult<serde_json::Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SettlerError::rpc(method, format!("request to {} failed: {}", self.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SettlerError::rpc(method, format!("HTTP {}: {}", status, body)));
        }

        let response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| SettlerError::rpc(method, format!("malformed response: {}", e)))?;

        if let Some(error) = response.error {
            return Err(SettlerError::rpc(
                method,
                format!("{} (code: {})", error.message, error.code),
            ));
        }

        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl ProofTransport for ProofApiClient {
    async fn request_proof(&self, request: &ProofRequest) -> SettlerResult<JobId> {
        let result = self
            .call(
                REQUEST_PROOF_METHOD,
                vec![
                    serde_json::json!(request.src_chain_id),
                    serde_json::json!(request.dst_chain_id),
                    serde_json::json!(request.block_number),
                    serde_json::json!(request.tx_index),
                ],
            )
            .await?;

        match result {
            serde_json::Value::Null => Err(SettlerError::rpc(
                REQUEST_PROOF_METHOD,
                "service returned no job id",
            )),
            serde_json::Value::String(ref s) if s.is_empty() => Err(SettlerError::rpc(
                REQUEST_PROOF_METHOD,
                "service returned an empty job id",
            )),
            job_id => Ok(JobId(job_id)),
        }
    }

    async fn query_proof(&self, job_id: &JobId) -> SettlerResult<ProofQueryResult> {
        let result = self.call(QUERY_PROOF_METHOD, vec![job_id.0.clone()]).await?;
        serde_json::from_value(result)
            .map_err(|e| SettlerError::rpc(QUERY_PROOF_METHOD, format!("unexpected result: {}", e)))
    }
}

// ============================================================================
// POLLER
// ============================================================================

/// Drives a proof job to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofPoller {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for ProofPoller {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ProofPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Requests a proof and polls it to completion.
    pub async fn request_and_wait<T: ProofTransport + ?Sized>(
        &self,
        transport: &T,
        request: &ProofRequest,
    ) -> SettlerResult<ReceiptProof> {
        let job_id = transport.request_proof(request).await?;
        info!(
            "Proof job {} requested (chain {} -> {}, block {}, tx index {})",
            job_id, request.src_chain_id, request.dst_chain_id, request.block_number, request.tx_index
        );
        self.wait(transport, job_id).await
    }

    /// Queries `job_id` up to `max_attempts` times, `interval` apart.
    ///
    /// # Returns
    ///
    /// * `Ok(ReceiptProof)` - The job completed
    /// * `Err(SettlerError::ProofGenerationFailed)` - The service reported an error
    /// * `Err(SettlerError::ProofPollingTimedOut)` - Still pending after the last attempt
    /// * `Err(SettlerError::Rpc)` - A query failed, or a completed job carried no proof
    pub async fn wait<T: ProofTransport + ?Sized>(
        &self,
        transport: &T,
        job_id: JobId,
    ) -> SettlerResult<ReceiptProof> {
        for attempt in 1..=self.max_attempts {
            let result = transport.query_proof(&job_id).await?;
            debug!(
                "Proof job {} attempt {}/{}: {:?}",
                job_id, attempt, self.max_attempts, result.status
            );

            match result.status {
                ProofStatus::Complete => {
                    let encoded = result.proof.ok_or_else(|| {
                        SettlerError::rpc(
                            QUERY_PROOF_METHOD,
                            format!("job {} complete without a proof", job_id),
                        )
                    })?;
                    let proof = decode_proof(&encoded)?;
                    info!("Proof job {} complete ({} bytes)", job_id, proof.len());
                    return Ok(ReceiptProof {
                        job_id,
                        encoded,
                        proof,
                    });
                }
                ProofStatus::Error => {
                    return Err(SettlerError::ProofGenerationFailed {
                        job_id: job_id.to_string(),
                    });
                }
                ProofStatus::Pending => {
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.interval).await;
                    }
                }
            }
        }

        Err(SettlerError::ProofPollingTimedOut {
            job_id: job_id.to_string(),
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_proof() {
        assert_eq!(decode_proof("3q2+7w==").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(decode_proof("not base64!").is_err());
    }

    #[test]
    fn test_unknown_status_is_pending() {
        let result: ProofQueryResult =
            serde_json::from_value(serde_json::json!({"status": "generating"})).unwrap();
        assert_eq!(result.status, ProofStatus::Pending);
        assert_eq!(result.proof, None);
    }

    #[test]
    fn test_known_statuses() {
        for (status, expected) in [
            ("pending", ProofStatus::Pending),
            ("complete", ProofStatus::Complete),
            ("error", ProofStatus::Error),
        ] {
            let result: ProofQueryResult =
                serde_json::from_value(serde_json::json!({"status": status, "proof": "3q2+7w=="})).unwrap();
            assert_eq!(result.status, expected);
        }
        assert_eq!(serde_json::to_value(ProofStatus::Complete).unwrap(), "complete");
    }

    #[test]
    fn test_job_id_display() {
        assert_eq!(JobId(serde_json::json!(42)).to_string(), "42");
        assert_eq!(JobId(serde_json::json!("abc")).to_string(), "abc");
    }
}
