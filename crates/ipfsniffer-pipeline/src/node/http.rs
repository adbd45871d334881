//! Peer node backed by a Kubo-compatible RPC API.
//!
//! Covers the data-plane surface: path/name resolution, DAG node access,
//! file reads, pubsub subscriptions, and routing record lookups. DHT
//! server-mode hosting is not reachable over RPC; the [`DhtHost`]
//! interface is implemented by embedded hosts only.
//!
//! [`DhtHost`]: super::DhtHost

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use cid::Cid;
use futures::TryStreamExt;
use serde::Deserialize;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use super::{
    DagLink, DagNode, DagNodeKind, DagService, FileReader, NodeError, PeerNode, PubsubMessage,
};

/// RPC client for one peer node endpoint. Cheap to clone.
#[derive(Clone)]
pub struct HttpNode {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    #[serde(rename = "Path")]
    path: String,
}

#[derive(Debug, Deserialize)]
struct StatResponse {
    #[serde(rename = "Type")]
    node_type: String,
    #[serde(rename = "Size", default)]
    size: i64,
}

#[derive(Debug, Deserialize)]
struct LsResponse {
    #[serde(rename = "Objects", default)]
    objects: Vec<LsObject>,
}

#[derive(Debug, Deserialize)]
struct LsObject {
    #[serde(rename = "Links", default)]
    links: Vec<LsLink>,
}

#[derive(Debug, Deserialize)]
struct LsLink {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Debug, Deserialize)]
struct PubsubEnvelope {
    #[serde(default)]
    from: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct RoutingEvent {
    #[serde(rename = "Type", default)]
    event_type: i32,
    #[serde(rename = "Extra", default)]
    extra: String,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(rename = "Message", default)]
    message: String,
}

/// Routing event carrying a record value.
const ROUTING_EVENT_VALUE: i32 = 5;

impl HttpNode {
    pub fn new(api_url: &str) -> Result<HttpNode, NodeError> {
        if api_url.is_empty() {
            return Err(NodeError::Rpc("api url required".into()));
        }
        Ok(HttpNode {
            http: reqwest::Client::new(),
            base_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v0/{path}", self.base_url)
    }

    async fn rpc(&self, path: &str, args: &[(&str, &str)]) -> Result<reqwest::Response, NodeError> {
        let resp = self
            .http
            .post(self.endpoint(path))
            .query(args)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = match resp.json::<RpcError>().await {
                Ok(err) => err.message,
                Err(_) => String::new(),
            };
            return Err(map_rpc_error(status, &message));
        }
        Ok(resp)
    }
}

fn map_transport_error(err: reqwest::Error) -> NodeError {
    if err.is_timeout() {
        NodeError::Timeout
    } else if err.is_connect() {
        NodeError::ConnectionRefused
    } else {
        NodeError::Rpc(err.to_string())
    }
}

fn map_rpc_error(status: u16, message: &str) -> NodeError {
    let lower = message.to_lowercase();
    if lower.contains("deadline") || lower.contains("timed out") {
        return NodeError::Timeout;
    }
    if lower.contains("no link named") || lower.contains("not found") || lower.contains("could not resolve") {
        return NodeError::NotFound(message.to_string());
    }
    if lower.contains("routing: not found") {
        return NodeError::ProviderNotFound;
    }
    NodeError::Rpc(format!("status {status}: {message}"))
}

#[async_trait]
impl DagService for HttpNode {
    async fn get(&self, cid: &Cid) -> Result<DagNode, NodeError> {
        let arg = format!("/ipfs/{cid}");
        let stat: StatResponse = self
            .rpc("files/stat", &[("arg", arg.as_str())])
            .await?
            .json()
            .await
            .map_err(map_transport_error)?;

        match stat.node_type.as_str() {
            "file" => Ok(DagNode { cid: *cid, kind: DagNodeKind::File { size: stat.size } }),
            "directory" => {
                let cid_str = cid.to_string();
                let ls: LsResponse = self
                    .rpc(
                        "ls",
                        &[("arg", cid_str.as_str()), ("resolve-type", "false"), ("size", "false")],
                    )
                    .await?
                    .json()
                    .await
                    .map_err(map_transport_error)?;

                let mut links = Vec::new();
                for object in ls.objects {
                    for link in object.links {
                        let child = Cid::try_from(link.hash.as_str())
                            .map_err(|e| NodeError::Rpc(format!("link cid: {e}")))?;
                        links.push(DagLink { name: link.name, cid: child });
                    }
                }
                Ok(DagNode { cid: *cid, kind: DagNodeKind::Directory { links } })
            }
            other => Err(NodeError::Unsupported(format!("node type {other:?}"))),
        }
    }

    async fn open_file(&self, cid: &Cid) -> Result<FileReader, NodeError> {
        let arg = format!("/ipfs/{cid}");
        let resp = self.rpc("cat", &[("arg", arg.as_str())]).await?;
        let stream = resp
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(stream)))
    }
}

#[async_trait]
impl PeerNode for HttpNode {
    fn dag(&self) -> Arc<dyn DagService> {
        Arc::new(self.clone())
    }

    async fn resolve_path(&self, path: &str) -> Result<Cid, NodeError> {
        let resolved: ResolveResponse = self
            .rpc("resolve", &[("arg", path)])
            .await?
            .json()
            .await
            .map_err(map_transport_error)?;

        let cid_str = resolved
            .path
            .strip_prefix("/ipfs/")
            .map(|rest| rest.split('/').next().unwrap_or_default())
            .unwrap_or_default();
        Cid::try_from(cid_str).map_err(|_| NodeError::InvalidPath(resolved.path.clone()))
    }

    async fn resolve_name(&self, name: &str) -> Result<String, NodeError> {
        let resolved: ResolveResponse = self
            .rpc("name/resolve", &[("arg", name)])
            .await?
            .json()
            .await
            .map_err(map_transport_error)?;
        Ok(resolved.path)
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<PubsubMessage>, NodeError> {
        // Topics travel multibase-encoded on the RPC surface.
        let encoded = multibase::encode(multibase::Base::Base64Url, topic.as_bytes());
        let resp = self.rpc("pubsub/sub", &[("arg", encoded.as_str())]).await?;

        let (tx, rx) = mpsc::channel(64);
        let topic = topic.to_string();
        tokio::spawn(async move {
            let stream = resp
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
            let mut lines = tokio::io::BufReader::new(StreamReader::new(stream)).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        let envelope: PubsubEnvelope = match serde_json::from_str(&line) {
                            Ok(env) => env,
                            Err(err) => {
                                debug!(%topic, %err, "skipping undecodable pubsub frame");
                                continue;
                            }
                        };
                        let data = match multibase::decode(&envelope.data) {
                            Ok((_, bytes)) => Bytes::from(bytes),
                            Err(_) => Bytes::copy_from_slice(envelope.data.as_bytes()),
                        };
                        let msg = PubsubMessage { data, from: envelope.from };
                        if tx.send(msg).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(err) => {
                        warn!(%topic, %err, "pubsub stream ended");
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn search_name_record(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<Bytes>, NodeError> {
        let key = format!("/ipns/{}", name.trim_start_matches("/ipns/"));

        let fetch = async {
            let resp = self.rpc("routing/get", &[("arg", key.as_str())]).await?;
            let stream = resp
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
            let mut lines = tokio::io::BufReader::new(StreamReader::new(stream)).lines();
            while let Some(line) = lines.next_line().await.map_err(NodeError::Io)? {
                if line.trim().is_empty() {
                    continue;
                }
                let event: RoutingEvent = match serde_json::from_str(&line) {
                    Ok(event) => event,
                    Err(_) => continue,
                };
                if event.event_type != ROUTING_EVENT_VALUE || event.extra.is_empty() {
                    continue;
                }
                if let Ok(record) = BASE64.decode(&event.extra) {
                    return Ok::<_, NodeError>(Some(Bytes::from(record)));
                }
            }
            Ok(None)
        };

        match tokio::time::timeout(timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Ok(None),
        }
    }
}
