//! Registrar
//!
//! One-shot self-registration with the manager, sent once the node's HTTP
//! listener is up. The manager derives this node's reachable IP from the
//! connection's peer address; only the bound port travels in `x-addr`.

use std::time::Duration;

use crate::error::StoreError;
use crate::protocol::{HEADER_ADDR, HEADER_LIMIT, HEADER_REGISTER, HEADER_USED, USER_AGENT};

const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

/// Announces this node to the manager. Any failure is fatal to startup.
pub async fn register(
    register_url: &str,
    port: u16,
    limit: u64,
    used: u64,
) -> Result<(), StoreError> {
    let client = reqwest::Client::new();
    let response = client
        .post(register_url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .header(HEADER_REGISTER, "true")
        .header(HEADER_ADDR, format!(":{}", port))
        .header(HEADER_LIMIT, limit)
        .header(HEADER_USED, used)
        .timeout(REGISTER_TIMEOUT)
        .send()
        .await
        .map_err(|err| StoreError::NodeUnreachable {
            url: register_url.to_string(),
            reason: err.to_string(),
        })?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(StoreError::NodeRejected {
            url: register_url.to_string(),
            verb: "register",
            status: response.status().as_u16(),
        });
    }
    Ok(())
}
