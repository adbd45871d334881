//! Bus stream and subject names.

/// Durable stream (container) covering all pipeline subjects.
pub const STREAM_NAME: &str = "IPFSNIFFER";

pub const CID_DISCOVERED: &str = "cid.discovered";
pub const FETCH_REQUEST: &str = "fetch.request";
pub const FETCH_RESULT: &str = "fetch.result";
pub const DOC_READY: &str = "doc.ready";
pub const INDEX_REQUEST: &str = "index.request";

pub const STREAM_GET: &str = "stream.get";
pub const STREAM_CHUNK_PREFIX: &str = "stream.chunk.";

/// Every subject the pipeline stream covers, wildcarding the per-stream
/// chunk subjects.
pub const PIPELINE_SUBJECTS: [&str; 7] = [
    CID_DISCOVERED,
    FETCH_REQUEST,
    FETCH_RESULT,
    DOC_READY,
    INDEX_REQUEST,
    STREAM_GET,
    "stream.chunk.*",
];

/// Chunk subject for one content stream.
pub fn stream_chunk_subject(stream_id: &str) -> String {
    format!("{STREAM_CHUNK_PREFIX}{stream_id}")
}

/// Dead-letter subject for an application-level rejection on `subject`.
pub fn dlq_subject(subject: &str) -> String {
    format!("{subject}.dlq")
}

/// Stream name for a per-subject DLQ stream.
///
/// Stream names allow only limited punctuation; subjects contain `.` and `*`.
pub fn dlq_stream_name(subject: &str) -> String {
    let normalized = subject.replace('.', "_").replace('*', "STAR");
    format!("{STREAM_NAME}_{normalized}_DLQ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_subject_embeds_stream_id() {
        assert_eq!(stream_chunk_subject("abc-123"), "stream.chunk.abc-123");
    }

    #[test]
    fn dlq_subject_appends_suffix() {
        assert_eq!(dlq_subject(FETCH_REQUEST), "fetch.request.dlq");
    }

    #[test]
    fn dlq_stream_names_are_normalized() {
        assert_eq!(dlq_stream_name("fetch.request"), "IPFSNIFFER_fetch_request_DLQ");
        assert_eq!(
            dlq_stream_name("stream.chunk.*"),
            "IPFSNIFFER_stream_chunk_STAR_DLQ"
        );
    }
}
