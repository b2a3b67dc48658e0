//! Download Coordinator
//!
//! Reassembles a file by fetching its chunks in placement order and teeing
//! the bytes through a hasher on their way to the client. A per-chunk hash
//! mismatch cannot unsend bytes already written, so the stream simply stops:
//! the client observes a truncated body. Documented behavior.

use bytes::Bytes;
use futures::{SinkExt, TryStreamExt};
use reqwest::Method;
use sha2::{Digest, Sha256};
use tracing::{error, info};

use super::Manager;
use crate::error::StoreError;
use crate::metadata::FileInfo;
use crate::protocol;

impl Manager {
    /// GETs one committed chunk from its node; any non-200 is an error.
    async fn retrieve_chunk(&self, url: &str) -> Result<reqwest::Response, StoreError> {
        let response = self.storage_request(Method::GET, url, None).await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(StoreError::NodeRejected {
                url: url.to_string(),
                verb: "download",
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    /// Fetches every chunk of `info` in placement order and forwards the
    /// bytes into `out`, verifying each chunk against the digest its ref
    /// carries. Stops mid-body on any error or mismatch.
    pub(crate) async fn stream_chunks(
        &self,
        info: FileInfo,
        mut out: futures::channel::mpsc::Sender<Result<Bytes, std::io::Error>>,
    ) {
        for chunk_ref in &info.placement {
            let url = protocol::rewrite_verb(chunk_ref, "download");
            let response = match self.retrieve_chunk(&url).await {
                Ok(response) => response,
                Err(err) => {
                    error!("Error reading chunk {}: {}", url, err);
                    return;
                }
            };

            let mut hasher = Sha256::new();
            let mut body = response.bytes_stream();
            loop {
                match body.try_next().await {
                    Ok(Some(bytes)) => {
                        hasher.update(&bytes);
                        if out.send(Ok(bytes)).await.is_err() {
                            // Client went away.
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        error!("Error reading chunk {}: {}", url, err);
                        return;
                    }
                }
            }

            let computed = hex::encode(hasher.finalize());
            let expected = protocol::chunk_hash(chunk_ref);
            if computed != expected {
                error!("Hash mismatch for chunk {}", chunk_ref);
                return;
            }
        }
        info!(
            "filename: {} size: {} sha256: {} downloaded successfully",
            info.name, info.size, info.hash
        );
    }
}
