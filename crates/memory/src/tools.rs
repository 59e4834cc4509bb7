//! The unified batch tools exposed over MCP.
//!
//! Every tool takes an array of items and returns `results` of equal length
//! in input order; each result is `{ok, value}` or `{ok, error: {kind,
//! message}}`. Items are processed with bounded parallelism, serialized per
//! file path; a failing item never aborts the rest of the batch.
use std::{future::Future, sync::Arc};

use {
    async_trait::async_trait,
    futures::StreamExt,
    mnemo_mcp::{
        registry::{McpTool, ResourceProvider, ToolRegistry},
        types::ResourceDef,
    },
    serde::Deserialize,
    serde_json::{Value, json},
};

use crate::{
    edit::{InsertPosition, SectionMode},
    error::{Error, Result},
    files::{self, Category, MAIN_FILE},
    json_index::IndexEntry,
    mainfile::ListAction,
    manager::{CreateRequest, EditOp, MemoryManager},
    search::{SearchFilters, SearchMode},
};

const BATCH_CONCURRENCY: usize = 8;

fn item_ok(value: Value) -> Value {
    json!({ "ok": true, "value": value })
}

fn item_err(e: &Error) -> Value {
    json!({ "ok": false, "error": { "kind": e.kind(), "message": e.to_string() } })
}

/// Run a batch: items sharing a key run sequentially in input order, groups
/// run concurrently, and results come back in input order.
async fn run_batch<K, F, Fut>(items: Vec<Value>, key_fn: K, handler: F) -> Vec<Value>
where
    K: Fn(&Value) -> Option<String>,
    F: Fn(Value) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let mut groups: Vec<(Option<String>, Vec<(usize, Value)>)> = Vec::new();
    'items: for (idx, item) in items.into_iter().enumerate() {
        let key = key_fn(&item);
        if key.is_some() {
            for (group_key, group) in &mut groups {
                if *group_key == key {
                    group.push((idx, item));
                    continue 'items;
                }
            }
        }
        groups.push((key, vec![(idx, item)]));
    }

    let handler = &handler;
    let mut results: Vec<(usize, Value)> = futures::stream::iter(groups)
        .map(|(_, group)| async move {
            let mut out = Vec::with_capacity(group.len());
            for (idx, item) in group {
                let value = match handler(item).await {
                    Ok(v) => item_ok(v),
                    Err(e) => item_err(&e),
                };
                out.push((idx, value));
            }
            out
        })
        .buffer_unordered(BATCH_CONCURRENCY)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .flatten()
        .collect();
    results.sort_by_key(|(idx, _)| *idx);
    results.into_iter().map(|(_, value)| value).collect()
}

/// Envelope-level parsing: the item array itself must be present and valid.
fn take_items(params: &Value, field: &str) -> anyhow::Result<Vec<Value>> {
    params
        .get(field)
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("missing {field:?} array"))
}

fn take_operation(params: &Value) -> anyhow::Result<String> {
    params
        .get("operation")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| anyhow::anyhow!("missing \"operation\""))
}

fn parse_item<T: serde::de::DeserializeOwned>(item: Value) -> Result<T> {
    serde_json::from_value(item)
        .map_err(|e| Error::InvalidArgument(format!("invalid item: {e}")))
}

fn entry_value(entry: &IndexEntry) -> Value {
    json!({
        "file_path": entry.file_path,
        "title": entry.title,
        "category": entry.category,
        "description": entry.description,
        "tags": entry.tags,
        "metadata": entry.metadata,
        "created_at": entry.created_at,
        "updated_at": entry.updated_at,
        "word_count": entry.word_count,
    })
}

// ── files ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilesOp {
    Create,
    Read,
    Update,
    Delete,
    Move,
    Copy,
    Rename,
    List,
}

impl std::str::FromStr for FilesOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "read" => Ok(Self::Read),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "move" => Ok(Self::Move),
            "copy" => Ok(Self::Copy),
            "rename" => Ok(Self::Rename),
            "list" => Ok(Self::List),
            other => Err(Error::InvalidArgument(format!(
                "unknown files operation {other:?}"
            ))),
        }
    }
}

#[derive(Deserialize)]
struct CreateItem {
    title: String,
    category: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    metadata: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct PathItem {
    file_path: String,
}

#[derive(Deserialize)]
struct UpdateItem {
    file_path: String,
    content: String,
    #[serde(default = "default_update_mode")]
    mode: String,
}

fn default_update_mode() -> String {
    "replace".into()
}

#[derive(Deserialize)]
struct MoveItem {
    file_path: String,
    new_category: String,
}

#[derive(Deserialize)]
struct RenameItem {
    file_path: String,
    new_title: String,
}

#[derive(Deserialize)]
struct CopyItem {
    file_path: String,
    #[serde(default)]
    new_title: Option<String>,
    #[serde(default)]
    new_category: Option<String>,
}

pub struct FilesTool {
    manager: Arc<MemoryManager>,
}

impl FilesTool {
    #[must_use]
    pub fn new(manager: Arc<MemoryManager>) -> Self {
        Self { manager }
    }
}

async fn handle_files_item(
    manager: Arc<MemoryManager>,
    op: FilesOp,
    item: Value,
) -> Result<Value> {
    match op {
        FilesOp::Create => {
            let item: CreateItem = parse_item(item)?;
            let info = manager
                .create(CreateRequest {
                    title: item.title,
                    category: item.category,
                    content: item.content,
                    tags: item.tags,
                    metadata: item.metadata,
                })
                .await?;
            Ok(serde_json::to_value(info)?)
        },
        FilesOp::Read => {
            let item: PathItem = parse_item(item)?;
            let (content, entry) = manager.read(&item.file_path).await?;
            let mut value = json!({ "file_path": item.file_path, "content": content });
            if let Some(entry) = entry {
                value["meta"] = entry_value(&entry);
            }
            Ok(value)
        },
        FilesOp::Update => {
            let item: UpdateItem = parse_item(item)?;
            let mode: SectionMode = item.mode.parse()?;
            let info = manager.update(&item.file_path, &item.content, mode).await?;
            Ok(serde_json::to_value(info)?)
        },
        FilesOp::Delete => {
            let item: PathItem = parse_item(item)?;
            manager.delete(&item.file_path).await?;
            Ok(json!({ "file_path": item.file_path, "deleted": true }))
        },
        FilesOp::Move => {
            let item: MoveItem = parse_item(item)?;
            let info = manager.move_file(&item.file_path, &item.new_category).await?;
            Ok(serde_json::to_value(info)?)
        },
        FilesOp::Rename => {
            let item: RenameItem = parse_item(item)?;
            let info = manager.rename(&item.file_path, &item.new_title).await?;
            Ok(serde_json::to_value(info)?)
        },
        FilesOp::Copy => {
            let item: CopyItem = parse_item(item)?;
            let info = manager
                .copy(
                    &item.file_path,
                    item.new_title.as_deref(),
                    item.new_category.as_deref(),
                )
                .await?;
            Ok(serde_json::to_value(info)?)
        },
        FilesOp::List => {
            let listed = manager.list_files().await?;
            Ok(serde_json::to_value(listed)?)
        },
    }
}

fn files_item_key(op: FilesOp, item: &Value) -> Option<String> {
    match op {
        FilesOp::Create => {
            let title = item.get("title")?.as_str()?;
            let category: Category = item.get("category")?.as_str()?.parse().ok()?;
            files::file_path_for(category, &files::slugify(title)).ok()
        },
        FilesOp::Read | FilesOp::List => None,
        _ => item
            .get("file_path")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
    }
}

#[async_trait]
impl McpTool for FilesTool {
    fn name(&self) -> &str {
        "files"
    }

    fn description(&self) -> &str {
        "Batch file operations on the memory tree: create, read, update, delete, move, copy, rename, list."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["create", "read", "update", "delete", "move", "copy", "rename", "list"]
                },
                "items": {
                    "type": "array",
                    "description": "One entry per file operation; shape depends on the operation",
                    "items": { "type": "object" }
                }
            },
            "required": ["operation", "items"]
        })
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let op: FilesOp = take_operation(&params)?.parse()?;
        let items = take_items(&params, "items")?;
        let manager = Arc::clone(&self.manager);
        let results = run_batch(
            items,
            |item| files_item_key(op, item),
            move |item| {
                let manager = Arc::clone(&manager);
                async move { handle_files_item(manager, op, item).await }
            },
        )
        .await;
        Ok(json!({ "results": results }))
    }
}

// ── search ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SearchItem {
    query: String,
    #[serde(default)]
    search_mode: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    category_filter: Option<Vec<String>>,
    #[serde(default)]
    tag_filter: Vec<String>,
}

pub struct SearchTool {
    manager: Arc<MemoryManager>,
}

impl SearchTool {
    #[must_use]
    pub fn new(manager: Arc<MemoryManager>) -> Self {
        Self { manager }
    }
}

async fn handle_search_item(manager: Arc<MemoryManager>, item: Value) -> Result<Value> {
    let item: SearchItem = parse_item(item)?;
    let mode: SearchMode = match &item.search_mode {
        Some(raw) => raw.parse()?,
        None => SearchMode::default(),
    };
    let limit = item.limit.unwrap_or(manager.default_search_limit());
    let categories = item
        .category_filter
        .map(|raw| {
            raw.iter()
                .map(|c| c.parse::<Category>())
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?;
    let filters = SearchFilters {
        categories,
        tags: item.tag_filter,
        file_path: item.file_path,
    };
    let resp = manager.search(&item.query, mode, limit, &filters).await?;
    let hits: Vec<Value> = resp
        .hits
        .iter()
        .map(|h| {
            json!({
                "file_path": h.file_path,
                "title": h.title,
                "category": h.category,
                "content": h.content,
                "header_path": h.header_path,
                "score": h.score,
            })
        })
        .collect();
    Ok(json!({
        "total": hits.len(),
        "degraded_mode": resp.degraded,
        "results": hits,
    }))
}

#[async_trait]
impl McpTool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search memory chunks with vector, full-text or hybrid (RRF) ranking, with optional category, tag and file filters."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "queries": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "query": { "type": "string" },
                            "search_mode": { "type": "string", "enum": ["vector", "fulltext", "hybrid"] },
                            "limit": { "type": "integer" },
                            "file_path": { "type": "string" },
                            "category_filter": { "type": "array", "items": { "type": "string" } },
                            "tag_filter": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["query"]
                    }
                }
            },
            "required": ["queries"]
        })
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let queries = take_items(&params, "queries")?;
        let manager = Arc::clone(&self.manager);
        let results = run_batch(
            queries,
            |_| None,
            move |item| {
                let manager = Arc::clone(&manager);
                async move { handle_search_item(manager, item).await }
            },
        )
        .await;
        Ok(json!({ "results": results }))
    }
}

// ── edit ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EditItem {
    file_path: String,
    edit_type: String,
    #[serde(default)]
    section_header: Option<String>,
    #[serde(default = "default_update_mode")]
    mode: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    find: Option<String>,
    #[serde(default)]
    replace: Option<String>,
    #[serde(default)]
    use_regex: bool,
    #[serde(default = "default_max_replacements")]
    max_replacements: i64,
    #[serde(default)]
    position: Option<String>,
    #[serde(default)]
    marker: Option<String>,
}

fn default_max_replacements() -> i64 {
    -1
}

pub struct EditTool {
    manager: Arc<MemoryManager>,
}

impl EditTool {
    #[must_use]
    pub fn new(manager: Arc<MemoryManager>) -> Self {
        Self { manager }
    }
}

fn edit_op_from_item(item: &EditItem) -> Result<EditOp> {
    match item.edit_type.as_str() {
        "section" => Ok(EditOp::Section {
            section_header: item
                .section_header
                .clone()
                .ok_or_else(|| Error::InvalidArgument("section edit requires section_header".into()))?,
            mode: item.mode.parse()?,
            text: item.text.clone().unwrap_or_default(),
        }),
        "find_replace" => Ok(EditOp::FindReplace {
            find: item
                .find
                .clone()
                .ok_or_else(|| Error::InvalidArgument("find_replace requires find".into()))?,
            replace: item.replace.clone().unwrap_or_default(),
            use_regex: item.use_regex,
            max_replacements: item.max_replacements,
        }),
        "insert" => Ok(EditOp::Insert {
            text: item
                .text
                .clone()
                .ok_or_else(|| Error::InvalidArgument("insert requires text".into()))?,
            position: item
                .position
                .as_deref()
                .unwrap_or("end")
                .parse::<InsertPosition>()?,
            marker: item.marker.clone(),
        }),
        other => Err(Error::InvalidArgument(format!(
            "unknown edit_type {other:?} (expected section, find_replace or insert)"
        ))),
    }
}

#[async_trait]
impl McpTool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Batch in-place edits: replace/append/prepend a named section, literal or regex find/replace, or positional insert."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "file_path": { "type": "string" },
                            "edit_type": { "type": "string", "enum": ["section", "find_replace", "insert"] },
                            "section_header": { "type": "string" },
                            "mode": { "type": "string", "enum": ["replace", "append", "prepend"] },
                            "text": { "type": "string" },
                            "find": { "type": "string" },
                            "replace": { "type": "string" },
                            "use_regex": { "type": "boolean" },
                            "max_replacements": { "type": "integer", "description": "-1 means unlimited" },
                            "position": { "type": "string", "enum": ["start", "end", "after_marker"] },
                            "marker": { "type": "string" }
                        },
                        "required": ["file_path", "edit_type"]
                    }
                }
            },
            "required": ["operations"]
        })
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let operations = take_items(&params, "operations")?;
        let manager = Arc::clone(&self.manager);
        let results = run_batch(
            operations,
            |item| {
                item.get("file_path")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned)
            },
            move |item| {
                let manager = Arc::clone(&manager);
                async move {
                    let item: EditItem = parse_item(item)?;
                    let op = edit_op_from_item(&item)?;
                    let outcome = manager.edit(&item.file_path, op).await?;
                    Ok(serde_json::to_value(outcome)?)
                }
            },
        )
        .await;
        Ok(json!({ "results": results }))
    }
}

// ── tags ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TagsItem {
    file_path: String,
    #[serde(default)]
    tags: Vec<String>,
}

pub struct TagsTool {
    manager: Arc<MemoryManager>,
}

impl TagsTool {
    #[must_use]
    pub fn new(manager: Arc<MemoryManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl McpTool for TagsTool {
    fn name(&self) -> &str {
        "tags"
    }

    fn description(&self) -> &str {
        "Batch tag management: add, remove or get the tag set of files. Tags are sets; add and remove are idempotent."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": { "type": "string", "enum": ["add", "remove", "get"] },
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "file_path": { "type": "string" },
                            "tags": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["file_path"]
                    }
                }
            },
            "required": ["operation", "items"]
        })
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let op = take_operation(&params)?;
        if !matches!(op.as_str(), "add" | "remove" | "get") {
            anyhow::bail!("unknown tags operation {op:?}");
        }
        let items = take_items(&params, "items")?;
        let manager = Arc::clone(&self.manager);
        let results = run_batch(
            items,
            |item| {
                item.get("file_path")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned)
            },
            move |item| {
                let manager = Arc::clone(&manager);
                let op = op.clone();
                async move {
                    let item: TagsItem = parse_item(item)?;
                    let tags = match op.as_str() {
                        "add" => manager.tags_add(&item.file_path, &item.tags).await?,
                        "remove" => manager.tags_remove(&item.file_path, &item.tags).await?,
                        _ => manager.tags_get(&item.file_path).await?,
                    };
                    Ok(json!({ "file_path": item.file_path, "tags": tags }))
                }
            },
        )
        .await;
        Ok(json!({ "results": results }))
    }
}

// ── main ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct MainItem {
    text: String,
    #[serde(default = "default_action")]
    action: String,
}

fn default_action() -> String {
    "add".into()
}

pub struct MainTool {
    manager: Arc<MemoryManager>,
}

impl MainTool {
    #[must_use]
    pub fn new(manager: Arc<MemoryManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl McpTool for MainTool {
    fn name(&self) -> &str {
        "main"
    }

    fn description(&self) -> &str {
        "Batch updates to main.md: append to Recent Updates, or manage goals, tasks and plans."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": { "type": "string", "enum": ["append", "goal", "task", "plan"] },
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "text": { "type": "string" },
                            "action": { "type": "string", "enum": ["add", "complete", "remove"] }
                        },
                        "required": ["text"]
                    }
                }
            },
            "required": ["operation", "items"]
        })
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let op = take_operation(&params)?;
        if !matches!(op.as_str(), "append" | "goal" | "task" | "plan") {
            anyhow::bail!("unknown main operation {op:?}");
        }
        let items = take_items(&params, "items")?;
        let manager = Arc::clone(&self.manager);
        let results = run_batch(
            items,
            |_| Some(MAIN_FILE.to_string()),
            move |item| {
                let manager = Arc::clone(&manager);
                let op = op.clone();
                async move {
                    let item: MainItem = parse_item(item)?;
                    let action: ListAction = item.action.parse()?;
                    match op.as_str() {
                        "append" => manager.main_append(&item.text).await?,
                        "goal" => manager.main_goal(action, &item.text).await?,
                        "task" => manager.main_task(action, &item.text).await?,
                        _ => manager.main_plan(action, &item.text).await?,
                    }
                    Ok(json!({ "text": item.text, "applied": true }))
                }
            },
        )
        .await;
        Ok(json!({ "results": results }))
    }
}

// ── memory ──────────────────────────────────────────────────────────

pub struct MemoryLifecycleTool {
    manager: Arc<MemoryManager>,
}

impl MemoryLifecycleTool {
    #[must_use]
    pub fn new(manager: Arc<MemoryManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl McpTool for MemoryLifecycleTool {
    fn name(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Memory lifecycle: initialize creates the base state (main.md + files_index.json); reset restores it, deleting everything else."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": { "type": "string", "enum": ["initialize", "reset"] }
            },
            "required": ["operation"]
        })
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let op = take_operation(&params)?;
        let result = match op.as_str() {
            "initialize" => {
                let created = self.manager.initialize().await?;
                json!({ "initialized": true, "created": created })
            },
            "reset" => {
                let removed = self.manager.reset().await?;
                json!({ "reset": true, "files_removed": removed })
            },
            other => anyhow::bail!("unknown memory operation {other:?}"),
        };
        Ok(result)
    }
}

// ── extract ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ExtractItem {
    file_path: String,
    section_header: String,
}

pub struct ExtractTool {
    manager: Arc<MemoryManager>,
}

impl ExtractTool {
    #[must_use]
    pub fn new(manager: Arc<MemoryManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl McpTool for ExtractTool {
    fn name(&self) -> &str {
        "extract"
    }

    fn description(&self) -> &str {
        "Batch extraction of named section bodies from memory files."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "requests": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "file_path": { "type": "string" },
                            "section_header": { "type": "string", "description": "Exact header line, e.g. \"## Status\"" }
                        },
                        "required": ["file_path", "section_header"]
                    }
                }
            },
            "required": ["requests"]
        })
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let requests = take_items(&params, "requests")?;
        let manager = Arc::clone(&self.manager);
        let results = run_batch(
            requests,
            |_| None,
            move |item| {
                let manager = Arc::clone(&manager);
                async move {
                    let item: ExtractItem = parse_item(item)?;
                    let body = manager
                        .extract_section(&item.file_path, &item.section_header)
                        .await?;
                    Ok(json!({
                        "file_path": item.file_path,
                        "section_header": item.section_header,
                        "content": body,
                    }))
                }
            },
        )
        .await;
        Ok(json!({ "results": results }))
    }
}

// ── list ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ListItem {
    #[serde(default = "default_list_kind")]
    kind: String,
    #[serde(default)]
    file_path: Option<String>,
}

fn default_list_kind() -> String {
    "files".into()
}

pub struct ListTool {
    manager: Arc<MemoryManager>,
}

impl ListTool {
    #[must_use]
    pub fn new(manager: Arc<MemoryManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl McpTool for ListTool {
    fn name(&self) -> &str {
        "list"
    }

    fn description(&self) -> &str {
        "Batch listings: all files (flat plus category tree) or the header outline of one file."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "requests": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "kind": { "type": "string", "enum": ["files", "sections"] },
                            "file_path": { "type": "string", "description": "Required for kind=sections" }
                        }
                    }
                }
            },
            "required": ["requests"]
        })
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let requests = take_items(&params, "requests")?;
        let manager = Arc::clone(&self.manager);
        let results = run_batch(
            requests,
            |_| None,
            move |item| {
                let manager = Arc::clone(&manager);
                async move {
                    let item: ListItem = parse_item(item)?;
                    match item.kind.as_str() {
                        "files" => Ok(serde_json::to_value(manager.list_files().await?)?),
                        "sections" => {
                            let path = item.file_path.ok_or_else(|| {
                                Error::InvalidArgument("sections listing requires file_path".into())
                            })?;
                            let sections = manager.list_sections(&path).await?;
                            Ok(json!({ "file_path": path, "sections": sections }))
                        },
                        other => Err(Error::InvalidArgument(format!(
                            "unknown list kind {other:?}"
                        ))),
                    }
                }
            },
        )
        .await;
        Ok(json!({ "results": results }))
    }
}

// ── help ────────────────────────────────────────────────────────────

const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "files",
        "files(operation, items): batch create/read/update/delete/move/copy/rename/list. \
Paths are <category-dir>/<slug>.md; slugs derive from titles. update modes: replace, append, prepend.",
    ),
    (
        "search",
        "search(queries): each query takes query, search_mode (vector|fulltext|hybrid, default hybrid), \
limit, and optional file_path / category_filter / tag_filter. Hybrid fuses both rankings with RRF; \
degraded_mode=true marks a single-backend fallback.",
    ),
    (
        "edit",
        "edit(operations): edit_type section (replace/append/prepend a named section's body), \
find_replace (literal or regex, max_replacements=-1 for unlimited), or insert (start, end, after_marker).",
    ),
    (
        "tags",
        "tags(operation, items): add/remove/get per file. Tags are a set: adding twice is idempotent, \
removing an absent tag succeeds.",
    ),
    (
        "main",
        "main(operation, items): append (Recent Updates), goal/task (add|complete|remove; complete moves \
the entry to Completed Tasks with the date), plan (add|complete checkbox items).",
    ),
    (
        "memory",
        "memory(operation): initialize creates main.md and files_index.json; reset deletes everything \
else and restores the base state.",
    ),
    (
        "extract",
        "extract(requests): return the body of a named section per file.",
    ),
    (
        "list",
        "list(requests): kind=files for the flat list plus category tree, kind=sections for one file's \
header outline.",
    ),
];

pub struct HelpTool;

#[async_trait]
impl McpTool for HelpTool {
    fn name(&self) -> &str {
        "help"
    }

    fn description(&self) -> &str {
        "Usage documentation for the memory tools, overall or per topic."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "topic": { "type": "string" }
            }
        })
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        match params.get("topic").and_then(Value::as_str) {
            Some(topic) => match HELP_TOPICS.iter().find(|(name, _)| *name == topic) {
                Some((name, text)) => Ok(json!({ "topic": name, "help": text })),
                None => Ok(json!({
                    "topic": topic,
                    "help": format!(
                        "unknown topic {topic:?}; available: {}",
                        HELP_TOPICS
                            .iter()
                            .map(|(name, _)| *name)
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                })),
            },
            None => Ok(json!({
                "help": "Persistent markdown memory with hybrid retrieval. Tools: files, search, edit, \
tags, main, memory, extract, list, help. Ask help with a topic for details.",
                "topics": HELP_TOPICS.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            })),
        }
    }
}

// ── resources ───────────────────────────────────────────────────────

const MAIN_URI: &str = "memory://main";
const FILE_URI_PREFIX: &str = "memory://file/";

/// Exposes `memory://main` and `memory://file/{path}`.
pub struct MemoryResources {
    manager: Arc<MemoryManager>,
}

impl MemoryResources {
    #[must_use]
    pub fn new(manager: Arc<MemoryManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ResourceProvider for MemoryResources {
    async fn list(&self) -> Vec<ResourceDef> {
        let mut resources = vec![ResourceDef {
            uri: MAIN_URI.into(),
            name: "Main memory".into(),
            description: Some("Goals, tasks, plans and the file index".into()),
            mime_type: Some("text/markdown".into()),
        }];
        if let Ok(listed) = self.manager.list_files().await {
            for entry in listed.files {
                resources.push(ResourceDef {
                    uri: format!("{FILE_URI_PREFIX}{}", entry.file_path),
                    name: entry.title,
                    description: (!entry.description.is_empty()).then_some(entry.description),
                    mime_type: Some("text/markdown".into()),
                });
            }
        }
        resources
    }

    async fn read(&self, uri: &str) -> anyhow::Result<String> {
        let path = if uri == MAIN_URI {
            MAIN_FILE
        } else {
            uri.strip_prefix(FILE_URI_PREFIX)
                .ok_or_else(|| anyhow::anyhow!("unknown resource uri {uri:?}"))?
        };
        let (content, _) = self.manager.read(path).await?;
        Ok(content)
    }
}

/// Register the nine tools in their canonical order.
pub fn register_tools(registry: &mut ToolRegistry, manager: Arc<MemoryManager>) {
    registry.register(Box::new(FilesTool::new(Arc::clone(&manager))));
    registry.register(Box::new(SearchTool::new(Arc::clone(&manager))));
    registry.register(Box::new(EditTool::new(Arc::clone(&manager))));
    registry.register(Box::new(TagsTool::new(Arc::clone(&manager))));
    registry.register(Box::new(MainTool::new(Arc::clone(&manager))));
    registry.register(Box::new(MemoryLifecycleTool::new(Arc::clone(&manager))));
    registry.register(Box::new(ExtractTool::new(Arc::clone(&manager))));
    registry.register(Box::new(ListTool::new(manager)));
    registry.register(Box::new(HelpTool));
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {std::time::Duration, tempfile::TempDir, tokio_util::sync::CancellationToken};

    use super::*;
    use crate::{
        config::MemoryConfig,
        embeddings::tests::MockEmbedder,
        store::{IndexStore, testing::MemIndexStore},
    };

    async fn file_only_manager(tmp: &TempDir) -> Arc<MemoryManager> {
        let cfg = MemoryConfig {
            files_path: tmp.path().join("memory"),
            ..Default::default()
        };
        Arc::new(MemoryManager::file_only(cfg).await.unwrap())
    }

    async fn indexed_manager(
        tmp: &TempDir,
    ) -> (Arc<MemoryManager>, Arc<MemIndexStore>, CancellationToken) {
        let cfg = MemoryConfig {
            files_path: tmp.path().join("memory"),
            sweep_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let store = Arc::new(MemIndexStore::new());
        let shutdown = CancellationToken::new();
        let manager = Arc::new(
            MemoryManager::indexed(cfg, store.clone(), Arc::new(MockEmbedder), shutdown.clone())
                .await
                .unwrap(),
        );
        (manager, store, shutdown)
    }

    #[tokio::test]
    async fn batch_isolates_item_failures() {
        let tmp = TempDir::new().unwrap();
        let manager = file_only_manager(&tmp).await;
        let tool = FilesTool::new(Arc::clone(&manager));

        let out = tool
            .execute(json!({
                "operation": "create",
                "items": [
                    { "title": "Valid", "category": "project", "content": "# Valid\n\nok" },
                    { "title": "Broken", "category": "journal", "content": "nope" }
                ]
            }))
            .await
            .unwrap();

        let results = out["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["ok"], true);
        assert_eq!(results[1]["ok"], false);
        assert_eq!(results[1]["error"]["kind"], "InvalidArgument");

        // The valid file was persisted despite the failing sibling.
        assert!(manager.read("projects/valid.md").await.is_ok());
    }

    #[tokio::test]
    async fn results_preserve_input_order() {
        let tmp = TempDir::new().unwrap();
        let manager = file_only_manager(&tmp).await;
        let files = FilesTool::new(Arc::clone(&manager));
        files
            .execute(json!({
                "operation": "create",
                "items": [{ "title": "One", "category": "other", "content": "one" }]
            }))
            .await
            .unwrap();

        let out = files
            .execute(json!({
                "operation": "read",
                "items": [
                    { "file_path": "other/missing.md" },
                    { "file_path": "other/one.md" },
                    { "file_path": "also/bad.md" }
                ]
            }))
            .await
            .unwrap();
        let results = out["results"].as_array().unwrap();
        assert_eq!(results[0]["ok"], false);
        assert_eq!(results[0]["error"]["kind"], "NotFound");
        assert_eq!(results[1]["ok"], true);
        assert_eq!(results[1]["value"]["content"], "one");
        assert_eq!(results[2]["ok"], false);
    }

    #[tokio::test]
    async fn envelope_errors_fail_the_call() {
        let tmp = TempDir::new().unwrap();
        let manager = file_only_manager(&tmp).await;
        let tool = FilesTool::new(manager);
        assert!(tool.execute(json!({ "operation": "create" })).await.is_err());
        assert!(tool.execute(json!({ "items": [] })).await.is_err());
        assert!(
            tool.execute(json!({ "operation": "shred", "items": [] }))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn same_file_edits_apply_in_input_order() {
        let tmp = TempDir::new().unwrap();
        let manager = file_only_manager(&tmp).await;
        let files = FilesTool::new(Arc::clone(&manager));
        files
            .execute(json!({
                "operation": "create",
                "items": [{ "title": "Doc", "category": "other", "content": "start" }]
            }))
            .await
            .unwrap();

        let edit = EditTool::new(Arc::clone(&manager));
        let out = edit
            .execute(json!({
                "operations": [
                    { "file_path": "other/doc.md", "edit_type": "find_replace", "find": "start", "replace": "one" },
                    { "file_path": "other/doc.md", "edit_type": "find_replace", "find": "one", "replace": "two" },
                    { "file_path": "other/doc.md", "edit_type": "find_replace", "find": "two", "replace": "three" }
                ]
            }))
            .await
            .unwrap();
        for result in out["results"].as_array().unwrap() {
            assert_eq!(result["ok"], true, "result: {result}");
            assert_eq!(result["value"]["replacements"], 1);
        }
        let (content, _) = manager.read("other/doc.md").await.unwrap();
        assert_eq!(content, "three");
    }

    #[tokio::test]
    async fn tags_tool_round_trip() {
        let tmp = TempDir::new().unwrap();
        let manager = file_only_manager(&tmp).await;
        FilesTool::new(Arc::clone(&manager))
            .execute(json!({
                "operation": "create",
                "items": [{ "title": "T", "category": "other", "content": "x" }]
            }))
            .await
            .unwrap();

        let tags = TagsTool::new(Arc::clone(&manager));
        let out = tags
            .execute(json!({
                "operation": "add",
                "items": [{ "file_path": "other/t.md", "tags": ["x", "y", "x"] }]
            }))
            .await
            .unwrap();
        assert_eq!(out["results"][0]["value"]["tags"], json!(["x", "y"]));

        let out = tags
            .execute(json!({
                "operation": "get",
                "items": [{ "file_path": "other/t.md" }]
            }))
            .await
            .unwrap();
        assert_eq!(out["results"][0]["value"]["tags"], json!(["x", "y"]));
    }

    #[tokio::test]
    async fn main_tool_goal_flow() {
        let tmp = TempDir::new().unwrap();
        let manager = file_only_manager(&tmp).await;
        MemoryLifecycleTool::new(Arc::clone(&manager))
            .execute(json!({ "operation": "initialize" }))
            .await
            .unwrap();

        let main = MainTool::new(Arc::clone(&manager));
        let out = main
            .execute(json!({
                "operation": "goal",
                "items": [
                    { "text": "goal one", "action": "add" },
                    { "text": "goal two", "action": "add" },
                    { "text": "goal one", "action": "complete" }
                ]
            }))
            .await
            .unwrap();
        for result in out["results"].as_array().unwrap() {
            assert_eq!(result["ok"], true, "result: {result}");
        }
        let (content, _) = manager.read(MAIN_FILE).await.unwrap();
        assert!(content.contains("- goal two"));
        assert!(content.contains("- goal one (completed "));
    }

    #[tokio::test]
    async fn memory_tool_reset_restores_base_state() {
        let tmp = TempDir::new().unwrap();
        let manager = file_only_manager(&tmp).await;
        let lifecycle = MemoryLifecycleTool::new(Arc::clone(&manager));
        lifecycle
            .execute(json!({ "operation": "initialize" }))
            .await
            .unwrap();
        FilesTool::new(Arc::clone(&manager))
            .execute(json!({
                "operation": "create",
                "items": [{ "title": "Gone", "category": "other", "content": "x" }]
            }))
            .await
            .unwrap();

        let out = lifecycle
            .execute(json!({ "operation": "reset" }))
            .await
            .unwrap();
        assert_eq!(out["reset"], true);
        assert_eq!(out["files_removed"], 1);

        let listed = ListTool::new(Arc::clone(&manager))
            .execute(json!({ "requests": [{ "kind": "files" }] }))
            .await
            .unwrap();
        assert_eq!(listed["results"][0]["value"]["total"], 0);
    }

    #[tokio::test]
    async fn extract_and_list_sections() {
        let tmp = TempDir::new().unwrap();
        let manager = file_only_manager(&tmp).await;
        FilesTool::new(Arc::clone(&manager))
            .execute(json!({
                "operation": "create",
                "items": [{
                    "title": "Doc",
                    "category": "concept",
                    "content": "# Doc\n\n## Part A\n\nalpha\n\n## Part B\n\nbeta"
                }]
            }))
            .await
            .unwrap();

        let out = ExtractTool::new(Arc::clone(&manager))
            .execute(json!({
                "requests": [
                    { "file_path": "concepts/doc.md", "section_header": "## Part A" },
                    { "file_path": "concepts/doc.md", "section_header": "## Missing" }
                ]
            }))
            .await
            .unwrap();
        assert_eq!(out["results"][0]["value"]["content"], "alpha");
        assert_eq!(out["results"][1]["error"]["kind"], "NotFound");

        let out = ListTool::new(manager)
            .execute(json!({
                "requests": [{ "kind": "sections", "file_path": "concepts/doc.md" }]
            }))
            .await
            .unwrap();
        let sections = out["results"][0]["value"]["sections"].as_array().unwrap();
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[1]["title"], "Part A");
    }

    #[tokio::test]
    async fn help_tool_topics() {
        let help = HelpTool;
        let out = help.execute(json!({})).await.unwrap();
        assert!(out["topics"].as_array().unwrap().len() >= 8);

        let out = help.execute(json!({ "topic": "search" })).await.unwrap();
        assert!(out["help"].as_str().unwrap().contains("RRF"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn search_tool_reports_degraded_mode() {
        let tmp = TempDir::new().unwrap();
        let (manager, store, shutdown) = indexed_manager(&tmp).await;
        FilesTool::new(Arc::clone(&manager))
            .execute(json!({
                "operation": "create",
                "items": [{ "title": "P1", "category": "project", "content": "# P1\n\nAlpha." }]
            }))
            .await
            .unwrap();
        // Wait for the reconcile to land.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while store.counts().await.unwrap().completed < 1 {
            assert!(std::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        store
            .fail_vector
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let out = SearchTool::new(Arc::clone(&manager))
            .execute(json!({ "queries": [{ "query": "Alpha", "search_mode": "hybrid", "limit": 5 }] }))
            .await
            .unwrap();
        let result = &out["results"][0];
        assert_eq!(result["ok"], true);
        assert_eq!(result["value"]["degraded_mode"], true);
        assert_eq!(
            result["value"]["results"][0]["file_path"],
            "projects/p1.md"
        );
        shutdown.cancel();
    }

    #[tokio::test]
    async fn search_tool_unavailable_in_file_only_mode() {
        let tmp = TempDir::new().unwrap();
        let manager = file_only_manager(&tmp).await;
        let out = SearchTool::new(manager)
            .execute(json!({ "queries": [{ "query": "anything" }] }))
            .await
            .unwrap();
        assert_eq!(out["results"][0]["ok"], false);
        assert_eq!(
            out["results"][0]["error"]["kind"],
            "StorageUnavailable"
        );
    }

    #[tokio::test]
    async fn resources_expose_main_and_files() {
        let tmp = TempDir::new().unwrap();
        let manager = file_only_manager(&tmp).await;
        MemoryLifecycleTool::new(Arc::clone(&manager))
            .execute(json!({ "operation": "initialize" }))
            .await
            .unwrap();
        FilesTool::new(Arc::clone(&manager))
            .execute(json!({
                "operation": "create",
                "items": [{ "title": "R", "category": "other", "content": "# R\n\nbody" }]
            }))
            .await
            .unwrap();

        let resources = MemoryResources::new(Arc::clone(&manager));
        let listed = resources.list().await;
        assert_eq!(listed[0].uri, "memory://main");
        assert!(listed.iter().any(|r| r.uri == "memory://file/other/r.md"));

        let main = resources.read("memory://main").await.unwrap();
        assert!(main.contains("# Main Memory"));
        let file = resources.read("memory://file/other/r.md").await.unwrap();
        assert!(file.contains("body"));
        assert!(resources.read("bogus://x").await.is_err());
    }

    #[tokio::test]
    async fn registry_has_nine_tools() {
        let tmp = TempDir::new().unwrap();
        let manager = file_only_manager(&tmp).await;
        let mut registry = ToolRegistry::new();
        register_tools(&mut registry, manager);
        assert_eq!(
            registry.tool_names(),
            vec!["files", "search", "edit", "tags", "main", "memory", "extract", "list", "help"]
        );
    }
}
