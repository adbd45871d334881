//! Strict index mapping for pipeline documents.

/// Initial index settings + mappings. `dynamic: strict` so a document with an
/// unexpected field is rejected per-item instead of mutating the schema.
pub const DEFAULT_MAPPING_JSON: &str = r#"{
  "settings": {
    "index": {
      "number_of_shards": 3,
      "number_of_replicas": 1,
      "refresh_interval": "5s"
    }
  },
  "mappings": {
    "dynamic": "strict",
    "properties": {
      "doc_id": { "type": "keyword" },
      "root_cid": { "type": "keyword" },
      "cid": { "type": "keyword" },
      "path": { "type": "keyword" },
      "path_text": { "type": "text" },
      "filename": { "type": "keyword" },
      "filename_text": { "type": "search_as_you_type" },
      "node_type": { "type": "keyword" },
      "ext": { "type": "keyword" },
      "mime": { "type": "keyword" },
      "size_bytes": { "type": "long" },
      "content_indexed": { "type": "boolean" },
      "skip_reason": { "type": "keyword" },
      "text": { "type": "text" },
      "text_truncated": { "type": "boolean" },
      "names_text": { "type": "text" },
      "discovered_at": { "type": "date" },
      "fetched_at": { "type": "date" },
      "processed_at": { "type": "date" },
      "sources": { "type": "keyword" },
      "ipns_name": { "type": "keyword" },
      "dir": {
        "properties": {
          "entries_count": { "type": "integer" },
          "entries_truncated": { "type": "boolean" }
        }
      }
    }
  }
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_valid_json_and_strict() {
        let v: serde_json::Value = serde_json::from_str(DEFAULT_MAPPING_JSON).unwrap();
        assert_eq!(v["mappings"]["dynamic"], "strict");
        assert_eq!(v["mappings"]["properties"]["doc_id"]["type"], "keyword");
        assert_eq!(
            v["mappings"]["properties"]["dir"]["properties"]["entries_count"]["type"],
            "integer"
        );
    }
}
