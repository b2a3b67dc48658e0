//! Upload Transaction
//!
//! The two-phase protocol that moves a file onto the nodes. Segments are
//! streamed to their nodes in scheme order (PUT), each verified against the
//! digest the node reports; the commit phase (POST) renames every tmp file
//! into place; any failure schedules a best-effort rollback phase (DELETE)
//! that also returns the plan-time reservations to the registry.

use std::sync::Arc;

use bytes::Bytes;
use futures::SinkExt;
use reqwest::Method;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{info, warn};

use super::planner::Scheme;
use super::{Manager, NODE_TIMEOUT};
use crate::error::StoreError;
use crate::protocol::{self, HEADER_FILENAME, HEADER_HASH, USER_AGENT};

/// Bytes read per iteration while pumping a segment to its node.
const COPY_BUF: usize = 64 * 1024;

impl Manager {
    /// Streams one scheme entry's worth of the request body to its node,
    /// feeding the segment and aggregate hashers on the way, and verifies
    /// the digest the node reports against the locally computed one. On
    /// success the entry's URL becomes a chunk ref and its tmp path is
    /// recorded for the commit/rollback phases.
    pub(crate) async fn store_chunk<R>(
        &self,
        body: &mut R,
        entry: &mut Scheme,
        aggregate: &mut Sha256,
    ) -> Result<(), StoreError>
    where
        R: AsyncRead + Unpin,
    {
        let mut segment = Sha256::new();
        let (tx, rx) = futures::channel::mpsc::channel::<Result<Bytes, std::io::Error>>(8);

        let url = format!("{}/segment", entry.url);
        let request = self
            .client
            .put(&url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::CONTENT_LENGTH, entry.size)
            .timeout(NODE_TIMEOUT)
            .body(reqwest::Body::wrap_stream(rx))
            .send();

        // The pump owns the sender: dropping it on exit ends the request
        // body, which lets the in-flight PUT complete.
        let pump = async {
            let mut tx = tx;
            let mut remaining = entry.size as usize;
            let mut buf = vec![0u8; COPY_BUF.min(remaining.max(1))];
            while remaining > 0 {
                let want = COPY_BUF.min(remaining);
                let read = body.read(&mut buf[..want]).await?;
                if read == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "request body ended before the planned segment size",
                    ));
                }
                let bytes = Bytes::copy_from_slice(&buf[..read]);
                segment.update(&bytes);
                aggregate.update(&bytes);
                if tx.send(Ok(bytes)).await.is_err() {
                    // Receiver dropped: the node side failed and the request
                    // future carries the real error.
                    break;
                }
                remaining -= read;
            }
            Ok::<_, std::io::Error>(())
        };

        let (response, pumped) = tokio::join!(request, pump);
        pumped?;
        let response = response.map_err(|err| StoreError::NodeUnreachable {
            url: url.clone(),
            reason: err.to_string(),
        })?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(StoreError::NodeRejected {
                url,
                verb: "segment",
                status: response.status().as_u16(),
            });
        }

        let digest = hex::encode(segment.finalize());
        let reported = header_str(&response, HEADER_HASH);
        if reported != digest {
            return Err(StoreError::HashMismatch {
                expected: digest,
                reported,
            });
        }

        entry.tmp_path = header_str(&response, HEADER_FILENAME);
        entry.url = protocol::chunk_ref(&entry.url, &digest);
        Ok(())
    }

    /// Commit phase: renames every streamed segment into place, in scheme
    /// order. The first failure aborts; the caller rolls back.
    pub(crate) async fn commit_scheme(&self, scheme: &mut [Scheme]) -> Result<(), StoreError> {
        for entry in scheme.iter_mut() {
            let url = protocol::rewrite_verb(&entry.url, "commit");
            let response = self
                .storage_request(Method::POST, &url, Some(&entry.tmp_path))
                .await?;
            if response.status() != reqwest::StatusCode::OK {
                return Err(StoreError::NodeRejected {
                    url,
                    verb: "commit",
                    status: response.status().as_u16(),
                });
            }
            entry.committed = true;
            info!("Committed chunk {}", entry.url);
        }
        Ok(())
    }

    /// Schedules the rollback of a scheme on a background task.
    pub(crate) fn schedule_rollback(self: &Arc<Self>, scheme: Vec<Scheme>) {
        let manager = self.clone();
        tokio::spawn(async move { manager.rollback_scheme(scheme).await });
    }

    /// Rollback phase: best effort, individual failures are logged and
    /// skipped. Deletes whatever each entry left on its node (the tmp file,
    /// or the committed chunk when the entry got as far as a rename) and
    /// returns every plan-time reservation to the registry, so `used` ends
    /// where the upload found it.
    pub(crate) async fn rollback_scheme(&self, scheme: Vec<Scheme>) {
        for entry in scheme {
            if !entry.tmp_path.is_empty() || entry.committed {
                let url = protocol::rewrite_verb(&entry.url, "rollback");
                match self
                    .storage_request(Method::DELETE, &url, Some(&entry.tmp_path))
                    .await
                {
                    Ok(response) if response.status() == reqwest::StatusCode::OK => {
                        info!("Rolled back chunk {}", entry.url);
                    }
                    Ok(response) => {
                        warn!("Rollback of {} got status {}", entry.url, response.status());
                    }
                    Err(err) => {
                        warn!("Rollback of {} failed: {}", entry.url, err);
                    }
                }
            }
            self.registry
                .revert(protocol::chunk_base(&entry.url), entry.size)
                .await;
        }
    }

    /// One manager -> node call with the fixed timeout. `filename` rides in
    /// the `x-filename` header when given.
    pub(crate) async fn storage_request(
        &self,
        method: Method,
        url: &str,
        filename: Option<&str>,
    ) -> Result<reqwest::Response, StoreError> {
        let mut request = self
            .client
            .request(method, url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(NODE_TIMEOUT);
        if let Some(filename) = filename {
            request = request.header(HEADER_FILENAME, filename);
        }
        request
            .send()
            .await
            .map_err(|err| StoreError::NodeUnreachable {
                url: url.to_string(),
                reason: err.to_string(),
            })
    }
}

fn header_str(response: &reqwest::Response, name: &str) -> String {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
