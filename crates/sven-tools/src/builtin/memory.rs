// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `memory_*` tool family (spec.md §4.3 table): thin call-contract boundary
//! over a persisted note store. spec.md §1 leaves the similarity-search
//! store's internals unspecified, so this is a keyword-overlap index, not
//! an embedding backend — grounded on [`super::update_memory::UpdateMemoryTool`]'s
//! JSON-file persistence idiom, generalized from single key-value slots to
//! free-text notes with tags and a naive relevance search.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub text: String,
    pub tags: Vec<String>,
    pub created_at_ms: i64,
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// `.memory/index.json`-backed note store shared by all `memory_*` tools.
pub struct MemoryIndex {
    path: PathBuf,
    state: Mutex<Vec<MemoryEntry>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl MemoryIndex {
    pub fn new(workspace_dir: impl AsRef<Path>) -> Self {
        let path = workspace_dir.as_ref().join(".memory").join("index.json");
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str::<Vec<MemoryEntry>>(&s).ok())
            .unwrap_or_default();
        let next_id = entries
            .iter()
            .filter_map(|e| e.id.strip_prefix("mem-").and_then(|n| n.parse::<u64>().ok()))
            .max()
            .unwrap_or(0)
            + 1;
        Self { path, state: Mutex::new(entries), next_id: std::sync::atomic::AtomicU64::new(next_id) }
    }

    fn fresh_id(&self) -> String {
        let n = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        format!("mem-{n}")
    }

    async fn persist(&self, entries: &[MemoryEntry]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries).unwrap_or_default();
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)
    }

    pub async fn append(&self, text: String, tags: Vec<String>) -> MemoryEntry {
        let entry = MemoryEntry { id: self.fresh_id(), text, tags, created_at_ms: now_ms() };
        let mut entries = self.state.lock().await;
        entries.push(entry.clone());
        let _ = self.persist(&entries).await;
        entry
    }

    pub async fn get(&self, id: &str) -> Option<MemoryEntry> {
        self.state.lock().await.iter().find(|e| e.id == id).cloned()
    }

    /// Rank entries by token-overlap count with `query`, descending; ties
    /// broken by recency.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<(MemoryEntry, usize)> {
        let query_tokens: std::collections::HashSet<String> = tokenize(query).into_iter().collect();
        let entries = self.state.lock().await;
        let mut scored: Vec<(MemoryEntry, usize)> = entries
            .iter()
            .map(|e| {
                let entry_tokens: std::collections::HashSet<String> =
                    tokenize(&e.text).into_iter().chain(e.tags.iter().flat_map(|t| tokenize(t))).collect();
                let overlap = query_tokens.intersection(&entry_tokens).count();
                (e.clone(), overlap)
            })
            .filter(|(_, score)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.created_at_ms.cmp(&a.0.created_at_ms)));
        scored.truncate(limit);
        scored
    }

    pub async fn stats(&self) -> Value {
        let entries = self.state.lock().await;
        let mut tag_counts: HashMap<String, usize> = HashMap::new();
        for e in entries.iter() {
            for t in &e.tags {
                *tag_counts.entry(t.clone()).or_default() += 1;
            }
        }
        json!({ "entry_count": entries.len(), "tag_counts": tag_counts })
    }
}

pub struct MemorySearchTool {
    pub index: std::sync::Arc<MemoryIndex>,
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }
    fn description(&self) -> &str {
        "Search persisted notes by keyword overlap with 'query'; returns up to 'limit' \
         (default 10) matches, most relevant first."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let query = match call.args.get("query").and_then(|v| v.as_str()) {
            Some(q) => q,
            None => return ToolOutput::err(&call.id, "missing 'query' argument"),
        };
        let limit = call.args.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
        let results = self.index.search(query, limit).await;
        let payload: Vec<Value> =
            results.into_iter().map(|(e, score)| json!({"entry": e, "score": score})).collect();
        ToolOutput::ok(&call.id, json!({"matches": payload}).to_string())
    }
}

pub struct MemoryGetTool {
    pub index: std::sync::Arc<MemoryIndex>,
}

#[async_trait]
impl Tool for MemoryGetTool {
    fn name(&self) -> &str {
        "memory_get"
    }
    fn description(&self) -> &str {
        "Fetch a single persisted note by id."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let id = match call.args.get("id").and_then(|v| v.as_str()) {
            Some(i) => i,
            None => return ToolOutput::err(&call.id, "missing 'id' argument"),
        };
        match self.index.get(id).await {
            Some(entry) => ToolOutput::ok(&call.id, serde_json::to_string(&entry).unwrap_or_default()),
            None => ToolOutput::err(&call.id, format!("no memory entry with id '{id}'")),
        }
    }
}

pub struct MemoryAppendTool {
    pub index: std::sync::Arc<MemoryIndex>,
}

#[async_trait]
impl Tool for MemoryAppendTool {
    fn name(&self) -> &str {
        "memory_append"
    }
    fn description(&self) -> &str {
        "Append a new note to memory with optional tags; returns the created entry."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["text"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let text = match call.args.get("text").and_then(|v| v.as_str()) {
            Some(t) => t.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'text' argument"),
        };
        let tags = call
            .args
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let entry = self.index.append(text, tags).await;
        ToolOutput::ok(&call.id, serde_json::to_string(&entry).unwrap_or_default())
    }
}

/// Bulk-load several notes at once (e.g. when ingesting a document).
pub struct MemoryIngestTool {
    pub index: std::sync::Arc<MemoryIndex>,
}

#[async_trait]
impl Tool for MemoryIngestTool {
    fn name(&self) -> &str {
        "memory_ingest"
    }
    fn description(&self) -> &str {
        "Append multiple notes at once. 'entries' is an array of {text, tags?}."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "entries": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "text": { "type": "string" },
                            "tags": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["text"]
                    }
                }
            },
            "required": ["entries"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(entries) = call.args.get("entries").and_then(|v| v.as_array()) else {
            return ToolOutput::err(&call.id, "missing 'entries' argument");
        };
        let mut created = Vec::new();
        for item in entries {
            let Some(text) = item.get("text").and_then(|v| v.as_str()) else {
                continue;
            };
            let tags = item
                .get("tags")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            created.push(self.index.append(text.to_string(), tags).await);
        }
        ToolOutput::ok(&call.id, json!({"ingested": created.len(), "entries": created}).to_string())
    }
}

pub struct MemoryStatsTool {
    pub index: std::sync::Arc<MemoryIndex>,
}

#[async_trait]
impl Tool for MemoryStatsTool {
    fn name(&self) -> &str {
        "memory_stats"
    }
    fn description(&self) -> &str {
        "Return entry count and tag frequency for the memory index."
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        ToolOutput::ok(&call.id, self.index.stats().await.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use std::sync::Arc;

    use super::*;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall { id: "m1".into(), name: name.into(), args }
    }

    #[tokio::test]
    async fn append_then_search_finds_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(MemoryIndex::new(dir.path()));
        let append = MemoryAppendTool { index: index.clone() };
        append
            .execute(&call("memory_append", json!({"text": "the deploy runs on Fridays", "tags": ["ops"]})))
            .await;

        let search = MemorySearchTool { index };
        let out = search.execute(&call("memory_search", json!({"query": "deploy Fridays"}))).await;
        assert!(out.content.contains("Fridays"));
    }

    #[tokio::test]
    async fn get_missing_id_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(MemoryIndex::new(dir.path()));
        let get = MemoryGetTool { index };
        let out = get.execute(&call("memory_get", json!({"id": "mem-999"}))).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn ingest_adds_multiple_entries() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(MemoryIndex::new(dir.path()));
        let ingest = MemoryIngestTool { index: index.clone() };
        let out = ingest
            .execute(&call(
                "memory_ingest",
                json!({"entries": [{"text": "one"}, {"text": "two", "tags": ["x"]}]}),
            ))
            .await;
        assert!(out.content.contains("\"ingested\":2"));

        let stats = MemoryStatsTool { index };
        let stats_out = stats.execute(&call("memory_stats", json!({}))).await;
        assert!(stats_out.content.contains("\"entry_count\":2"));
    }

    #[tokio::test]
    async fn index_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = Arc::new(MemoryIndex::new(dir.path()));
            index.append("persisted note".into(), vec![]).await;
        }
        let reopened = MemoryIndex::new(dir.path());
        let results = reopened.search("persisted", 10).await;
        assert_eq!(results.len(), 1);
    }
}
