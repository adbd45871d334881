//! Search parameter normalization and query building.

use serde_json::{json, Value};

use crate::{Error, Result};

/// Parameters accepted by the search endpoint.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub q: String,

    pub from: i64,
    pub size: i64,

    pub root_cid: String,
    pub path: String,
    pub mime: String,
    pub ext: String,
    pub source: String,

    /// `field[:asc|:desc]`, e.g. `processed_at:desc`.
    pub sort: String,
}

impl SearchParams {
    /// Trim everything and clamp paging into the supported window.
    pub fn normalize(&mut self) {
        self.q = self.q.trim().to_string();
        self.root_cid = self.root_cid.trim().to_string();
        self.path = self.path.trim().to_string();
        self.mime = self.mime.trim().to_string();
        self.ext = self.ext.trim().to_string();
        self.source = self.source.trim().to_string();
        self.sort = self.sort.trim().to_string();

        if self.from < 0 {
            self.from = 0;
        }
        if self.size <= 0 {
            self.size = 20;
        }
        if self.size > 100 {
            self.size = 100;
        }
    }
}

/// Build the engine query body for the given params.
pub fn build_query(p: &SearchParams) -> Value {
    let mut must: Vec<Value> = Vec::new();
    let mut filter: Vec<Value> = Vec::new();

    if p.q.is_empty() {
        must.push(json!({ "match_all": {} }));
    } else {
        // A bool of should clauses so a term like "wiki" also reaches
        // "wikipedia": exact simple-query-string, fuzzy best-fields, and
        // phrase-prefix.
        let should = json!([
            {
                "simple_query_string": {
                    "query": p.q,
                    "fields": ["text", "names_text", "path_text"],
                    "default_operator": "and",
                    "minimum_should_match": "1"
                }
            },
            {
                "multi_match": {
                    "query": p.q,
                    "fields": ["text^1", "names_text^2", "path_text^1.5"],
                    "type": "best_fields",
                    "fuzziness": "AUTO",
                    "prefix_length": 1
                }
            },
            {
                "multi_match": {
                    "query": p.q,
                    "fields": ["text", "names_text", "path_text"],
                    "type": "phrase_prefix"
                }
            }
        ]);
        must.push(json!({
            "bool": { "should": should, "minimum_should_match": "1" }
        }));
    }

    if !p.root_cid.is_empty() {
        filter.push(json!({ "term": { "root_cid": p.root_cid } }));
    }
    if !p.path.is_empty() {
        filter.push(json!({ "prefix": { "path": p.path } }));
    }
    if !p.mime.is_empty() {
        filter.push(json!({ "term": { "mime": p.mime } }));
    }
    if !p.ext.is_empty() {
        filter.push(json!({ "term": { "ext": p.ext } }));
    }
    if !p.source.is_empty() {
        filter.push(json!({ "term": { "sources": p.source } }));
    }

    json!({ "bool": { "must": must, "filter": filter } })
}

/// Parse the sort spec into an engine sort clause.
///
/// Only `processed_at` and `size_bytes` are sortable. With no explicit sort,
/// an empty query gets `processed_at:desc` and a real query keeps relevance
/// ordering (`None`).
pub fn parse_sort(p: &SearchParams) -> Result<Option<Value>> {
    let mut sort = p.sort.trim().to_string();
    if sort.is_empty() {
        if p.q.trim().is_empty() {
            sort = "processed_at:desc".to_string();
        } else {
            return Ok(None);
        }
    }

    let (field, dir) = match sort.split_once(':') {
        Some((f, d)) => (f.trim(), d.trim().to_lowercase()),
        None => (sort.as_str(), "asc".to_string()),
    };

    if field.is_empty() {
        return Err(Error::BadRequest("sort: field required".into()));
    }
    if field != "processed_at" && field != "size_bytes" {
        return Err(Error::BadRequest(format!("sort: unsupported field {field:?}")));
    }
    if dir != "asc" && dir != "desc" {
        return Err(Error::BadRequest("sort: dir must be asc or desc".into()));
    }

    Ok(Some(json!([{ field: { "order": dir } }])))
}

/// Highlight settings shared by every search.
pub fn highlight_spec() -> Value {
    json!({
        "pre_tags": ["<em>"],
        "post_tags": ["</em>"],
        "fields": {
            "text": { "fragment_size": 150, "number_of_fragments": 3 },
            "names_text": { "fragment_size": 80, "number_of_fragments": 2 },
            "path_text": { "fragment_size": 80, "number_of_fragments": 2 }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_paging() {
        let mut p = SearchParams { from: -3, size: 500, ..Default::default() };
        p.normalize();
        assert_eq!(p.from, 0);
        assert_eq!(p.size, 100);

        let mut p = SearchParams { size: 0, ..Default::default() };
        p.normalize();
        assert_eq!(p.size, 20);
    }

    #[test]
    fn empty_query_is_match_all() {
        let q = build_query(&SearchParams::default());
        assert!(q["bool"]["must"][0]["match_all"].is_object());
    }

    #[test]
    fn filters_are_applied_as_terms() {
        let p = SearchParams {
            q: "hello".into(),
            root_cid: "bafyroot".into(),
            mime: "text/html".into(),
            ext: ".html".into(),
            source: "pubsub".into(),
            path: "/ipfs/bafyroot".into(),
            ..Default::default()
        };
        let q = build_query(&p);
        let filters = q["bool"]["filter"].as_array().unwrap();
        assert_eq!(filters.len(), 5);
        assert_eq!(filters[0]["term"]["root_cid"], "bafyroot");
        assert_eq!(filters[1]["prefix"]["path"], "/ipfs/bafyroot");
    }

    #[test]
    fn text_query_builds_should_clauses() {
        let p = SearchParams { q: "wiki".into(), ..Default::default() };
        let q = build_query(&p);
        let should = q["bool"]["must"][0]["bool"]["should"].as_array().unwrap();
        assert_eq!(should.len(), 3);
        assert_eq!(should[0]["simple_query_string"]["query"], "wiki");
        assert_eq!(should[2]["multi_match"]["type"], "phrase_prefix");
    }

    #[test]
    fn default_sort_depends_on_query() {
        let empty = SearchParams::default();
        let sort = parse_sort(&empty).unwrap().unwrap();
        assert_eq!(sort[0]["processed_at"]["order"], "desc");

        let with_q = SearchParams { q: "hello".into(), ..Default::default() };
        assert!(parse_sort(&with_q).unwrap().is_none());
    }

    #[test]
    fn explicit_sort_is_validated() {
        let p = SearchParams { sort: "size_bytes:asc".into(), ..Default::default() };
        let sort = parse_sort(&p).unwrap().unwrap();
        assert_eq!(sort[0]["size_bytes"]["order"], "asc");

        // Bare field defaults to asc.
        let p = SearchParams { sort: "size_bytes".into(), ..Default::default() };
        let sort = parse_sort(&p).unwrap().unwrap();
        assert_eq!(sort[0]["size_bytes"]["order"], "asc");
    }

    #[test]
    fn unsupported_sort_is_a_bad_request() {
        let p = SearchParams { sort: "text:desc".into(), ..Default::default() };
        assert!(parse_sort(&p).unwrap_err().is_bad_request());

        let p = SearchParams { sort: "processed_at:sideways".into(), ..Default::default() };
        assert!(parse_sort(&p).unwrap_err().is_bad_request());
    }
}
