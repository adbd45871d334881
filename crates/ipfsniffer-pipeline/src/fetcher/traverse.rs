//! Bounded depth-first DAG traversal.
//!
//! The walk is iterative (explicit stack) and pre-order: a node's result is
//! emitted before its children are visited. Directory children are charged
//! against the node budget at listing time, so a directory whose subtree
//! would bust the budget carries `truncated=true` on its own record and the
//! uncharged children are never visited. Hard exhaustion (deadline, node
//! budget at visit) aborts the walk with a limit error; the worker turns
//! that into the terminal `failed/limit_exceeded` record.

use std::time::Instant;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cid::Cid;
use tokio::io::AsyncReadExt;

use ipfsniffer_core::filter::{self, Policy, SkipReason};
use ipfsniffer_core::proto::{
    FetchContentResult, FetchDirectory, FetchRequestData, FetchResultData,
};

use super::counting_dag::CountingDag;
use crate::node::{DagNodeKind, DagService, FileReader, NodeError};
use crate::{Error, Result};

/// Per-job budgets lifted out of the request. Zero disables a limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraverseLimits {
    pub max_total_bytes: i64,
    pub max_file_bytes: i64,
    pub max_dag_nodes: i64,
    pub max_depth: i64,
    pub inline_max_bytes: i64,
}

pub fn limits_from_request(data: &FetchRequestData) -> TraverseLimits {
    let limits = data.limits.clone().unwrap_or_default();
    let content = data.content.clone().unwrap_or_default();
    TraverseLimits {
        max_total_bytes: limits.max_total_bytes,
        max_file_bytes: limits.max_file_bytes,
        max_dag_nodes: limits.max_dag_nodes,
        max_depth: limits.max_depth,
        inline_max_bytes: content.inline_max_bytes,
    }
}

pub fn policy_from_request(data: &FetchRequestData) -> Policy {
    let policy = data.policy.clone().unwrap_or_default();
    let limits = data.limits.clone().unwrap_or_default();
    Policy {
        skip_ext: policy.skip_ext,
        skip_mime_prefix: policy.skip_mime_prefix,
        max_file_bytes: limits.max_file_bytes,
    }
}

/// Receives one result per visited node, in traversal order.
#[async_trait]
pub trait ResultSink: Send {
    async fn emit(&mut self, data: FetchResultData) -> Result<()>;
}

struct Frame {
    cid: Cid,
    path: String,
    depth: i64,
}

/// One traversal job.
pub struct Traversal<'a> {
    dag: &'a CountingDag,
    root_cid: &'a str,
    limits: TraverseLimits,
    policy: Policy,
    deadline: Option<Instant>,
    total_bytes: i64,
}

impl<'a> Traversal<'a> {
    pub fn new(
        dag: &'a CountingDag,
        root_cid: &'a str,
        limits: TraverseLimits,
        policy: Policy,
        deadline: Option<Instant>,
    ) -> Traversal<'a> {
        Traversal { dag, root_cid, limits, policy, deadline, total_bytes: 0 }
    }

    /// Walk the DAG rooted at `start`, emitting one result per node.
    pub async fn walk(
        &mut self,
        start_path: &str,
        start: Cid,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        let mut stack = vec![Frame { cid: start, path: start_path.to_string(), depth: 0 }];

        while let Some(frame) = stack.pop() {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    return Err(Error::Node(NodeError::LimitExceeded { limit: "timeout_ms" }));
                }
            }

            if self.limits.max_depth > 0 && frame.depth > self.limits.max_depth {
                sink.emit(skipped_unknown(self.root_cid, &frame.path, "max_depth exceeded"))
                    .await?;
                continue;
            }

            let node = self.dag.get(&frame.cid).await.map_err(Error::Node)?;
            match node.kind {
                DagNodeKind::File { size } => self.visit_file(&frame, size, sink).await?,
                DagNodeKind::Directory { links } => {
                    self.visit_dir(&frame, links, &mut stack, sink).await?
                }
            }
        }

        Ok(())
    }

    async fn visit_file(&mut self, frame: &Frame, size: i64, sink: &mut dyn ResultSink) -> Result<()> {
        let mut data = base_result(self.root_cid, &frame.path, "file");
        data.size_bytes = size;
        data.ext = filter::ext_of_path(&frame.path);

        // Budget the running total whenever the size is known.
        if size > 0 {
            if self.limits.max_total_bytes > 0
                && self.total_bytes + size > self.limits.max_total_bytes
            {
                data.status = "skipped".into();
                data.skip_reason = SkipReason::LimitExceeded.as_str().into();
                data.error = "max_total_bytes exceeded".into();
                return sink.emit(data).await;
            }
            self.total_bytes += size;
        }

        // Mime detection is left to extraction; the filter sees the path and
        // size only.
        let decision = filter::decide(&frame.path, "", size, &self.policy);
        if !decision.allowed {
            data.status = "skipped".into();
            data.skip_reason = decision
                .skip_reason
                .map(SkipReason::as_str)
                .unwrap_or_default()
                .into();
            return sink.emit(data).await;
        }

        if self.limits.max_file_bytes > 0 && size > self.limits.max_file_bytes {
            data.status = "skipped".into();
            data.skip_reason = SkipReason::TooLarge.as_str().into();
            return sink.emit(data).await;
        }

        if self.limits.inline_max_bytes > 0 {
            let mut budget = self.limits.inline_max_bytes;
            if self.limits.max_total_bytes > 0 {
                let remaining = self.limits.max_total_bytes - self.total_bytes;
                if remaining <= 0 {
                    data.status = "skipped".into();
                    data.skip_reason = SkipReason::LimitExceeded.as_str().into();
                    data.error = "max_total_bytes exceeded".into();
                    return sink.emit(data).await;
                }
                budget = budget.min(remaining);
            }

            match self.read_inline(&frame.cid, budget).await {
                Ok(bytes) => {
                    self.total_bytes += bytes.len() as i64;
                    if !bytes.is_empty() {
                        data.content = Some(FetchContentResult {
                            mode: "inline".into(),
                            inline_base64: BASE64.encode(&bytes),
                        });
                    }
                }
                Err(err) => {
                    data.status = "failed".into();
                    data.error = err.to_string();
                    return sink.emit(data).await;
                }
            }
        }

        sink.emit(data).await
    }

    async fn visit_dir(
        &mut self,
        frame: &Frame,
        links: Vec<crate::node::DagLink>,
        stack: &mut Vec<Frame>,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        let mut data = base_result(self.root_cid, &frame.path, "dir");

        let mut entries = Vec::with_capacity(links.len());
        let mut children = Vec::with_capacity(links.len());
        let mut truncated = false;

        for link in links {
            if self.dag.charge(&link.cid).is_err() {
                truncated = true;
                break;
            }
            entries.push(link.name.clone());
            let base = frame.path.trim_end_matches('/');
            children.push(Frame {
                cid: link.cid,
                path: format!("{base}/{}", link.name),
                depth: frame.depth + 1,
            });
        }

        data.directory = Some(FetchDirectory { entries, truncated });
        sink.emit(data).await?;

        // Reverse so the first entry is visited first.
        for child in children.into_iter().rev() {
            stack.push(child);
        }

        Ok(())
    }

    async fn read_inline(&self, cid: &Cid, budget: i64) -> Result<Vec<u8>> {
        let mut reader = self.dag.open_file(cid).await.map_err(Error::Node)?;
        Ok(read_up_to(&mut reader, budget).await?)
    }
}

/// Read at most `n` bytes from a reader.
pub async fn read_up_to(reader: &mut FileReader, n: i64) -> std::io::Result<Vec<u8>> {
    if n <= 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; n as usize];
    let mut filled = 0usize;
    loop {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
        if filled == buf.len() {
            break;
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

fn base_result(root_cid: &str, path: &str, node_type: &str) -> FetchResultData {
    FetchResultData {
        root_cid: root_cid.to_string(),
        path: path.to_string(),
        node_type: node_type.to_string(),
        size_bytes: 0,
        mime: String::new(),
        ext: String::new(),
        content: Some(FetchContentResult { mode: "none".into(), inline_base64: String::new() }),
        directory: Some(FetchDirectory { entries: Vec::new(), truncated: false }),
        status: "ok".into(),
        skip_reason: String::new(),
        error: String::new(),
        fetched_at: String::new(),
    }
}

/// Skipped record for a node whose type was never resolved.
pub fn skipped_unknown(root_cid: &str, path: &str, reason: &str) -> FetchResultData {
    let mut data = base_result(root_cid, path, "unknown");
    data.status = "skipped".into();
    data.skip_reason = SkipReason::LimitExceeded.as_str().into();
    data.error = reason.to_string();
    data
}
