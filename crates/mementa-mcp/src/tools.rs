//! The agent-facing tools, registered into the [`ToolRegistry`].
//!
//! Each tool is a thin handler: typed input in, vault/index services do the
//! work, JSON summary out. Input structs derive their advertised schema.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use mementa_core::{Category, Error, MoveReason, Result, Uid};
use mementa_index::{ConnectedOptions, Direction, SearchOptions};
use mementa_vault::{CreateNote, SaveOptions};

use crate::registry::{parse_input, Tool, ToolContext, ToolRegistry};
use crate::session::AssociateOptions;

/// Register every built-in tool.
pub fn register_builtin(registry: &mut ToolRegistry) {
    registry.register(Arc::new(SearchMemory));
    registry.register(Arc::new(CreateNoteTool));
    registry.register(Arc::new(UpdateNote));
    registry.register(Arc::new(DeleteNote));
    registry.register(Arc::new(ExploreLinks));
    registry.register(Arc::new(AssociativeSearch));
    registry.register(Arc::new(SessionContext));
    registry.register(Arc::new(ReflectSession));
}

fn parse_category(tool: &str, raw: &str) -> Result<Category> {
    Category::from_str(raw).map_err(|_| Error::SchemaValidation {
        tool: tool.to_string(),
        detail: format!("unknown category: {raw:?}"),
    })
}

fn parse_uid(tool: &str, raw: &str) -> Result<Uid> {
    Uid::parse(raw).map_err(|_| Error::SchemaValidation {
        tool: tool.to_string(),
        detail: format!("malformed note id: {raw:?}"),
    })
}

// =============================================================================
// search_memory
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct SearchMemoryInput {
    /// Full-text query.
    query: String,
    category: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    project: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

struct SearchMemory;

#[async_trait]
impl Tool for SearchMemory {
    fn name(&self) -> &'static str {
        "search_memory"
    }

    fn description(&self) -> &'static str {
        "Hybrid search over the vault: full-text relevance blended with link-graph centrality"
    }

    fn input_schema(&self) -> RootSchema {
        schemars::schema_for!(SearchMemoryInput)
    }

    fn validate(&self, input: &Value) -> Result<()> {
        parse_input::<SearchMemoryInput>(self.name(), input).map(|_| ())
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let input: SearchMemoryInput = parse_input(self.name(), &input)?;
        let category = input
            .category
            .as_deref()
            .map(|raw| parse_category(self.name(), raw))
            .transpose()?;

        let options = SearchOptions {
            category,
            tags: input.tags,
            project: input.project,
            limit: input.limit.unwrap_or(mementa_core::defaults::SEARCH_LIMIT),
            offset: input.offset.unwrap_or(0),
            ..SearchOptions::default()
        };
        let (results, metrics, total) = ctx.engine.search(&input.query, &options).await?;

        Ok(json!({
            "results": results,
            "metrics": metrics,
            "total_count": total,
        }))
    }
}

// =============================================================================
// create_note
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct CreateNoteInput {
    title: String,
    #[serde(default)]
    content: String,
    category: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    project: Option<String>,
}

struct CreateNoteTool;

#[async_trait]
impl Tool for CreateNoteTool {
    fn name(&self) -> &'static str {
        "create_note"
    }

    fn description(&self) -> &'static str {
        "Create a markdown note in the PARA vault and index it"
    }

    fn input_schema(&self) -> RootSchema {
        schemars::schema_for!(CreateNoteInput)
    }

    fn validate(&self, input: &Value) -> Result<()> {
        parse_input::<CreateNoteInput>(self.name(), input).map(|_| ())
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let input: CreateNoteInput = parse_input(self.name(), &input)?;
        if input.title.trim().is_empty() {
            return Err(Error::SchemaValidation {
                tool: self.name().to_string(),
                detail: "title must not be empty".into(),
            });
        }

        let mut request = CreateNote::new(input.title, input.content);
        if let Some(raw) = input.category.as_deref() {
            request.category = parse_category(self.name(), raw)?;
        }
        request.tags = input.tags;
        request.project = input.project;

        // Route through the organizer so the file lands in its PARA home.
        let mut header = mementa_core::NoteHeader::new(request.title.clone());
        header.category = request.category;
        header.project = request.project.clone();
        let path = ctx.organizer.target_path(&header);

        let mut note = ctx.store.create(&path, request).await?;
        ctx.organizer.organize(&mut note, MoveReason::Manual).await?;

        // Body links become header links before the first index pass.
        ctx.synchronizer.sync(note.uid()).await?;
        let indexed = ctx
            .store
            .find_by_uid(note.uid())
            .await?
            .ok_or_else(|| Error::Internal("created note vanished".into()))?;
        ctx.engine.index_note(&indexed).await?;

        Ok(json!({
            "id": indexed.header.id,
            "title": indexed.header.title,
            "category": indexed.header.category,
            "path": indexed.path,
            "links": indexed.header.links,
        }))
    }
}

// =============================================================================
// update_note
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct UpdateNoteInput {
    /// UID of the note to update.
    id: String,
    title: Option<String>,
    content: Option<String>,
    category: Option<String>,
    tags: Option<Vec<String>>,
    /// New project; an empty string clears it.
    project: Option<String>,
}

struct UpdateNote;

#[async_trait]
impl Tool for UpdateNote {
    fn name(&self) -> &'static str {
        "update_note"
    }

    fn description(&self) -> &'static str {
        "Update a note's content or metadata, re-routing and re-indexing it"
    }

    fn input_schema(&self) -> RootSchema {
        schemars::schema_for!(UpdateNoteInput)
    }

    fn validate(&self, input: &Value) -> Result<()> {
        parse_input::<UpdateNoteInput>(self.name(), input).map(|_| ())
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let input: UpdateNoteInput = parse_input(self.name(), &input)?;
        let uid = parse_uid(self.name(), &input.id)?;

        let mut note = ctx
            .store
            .find_by_uid(&uid)
            .await?
            .ok_or_else(|| Error::NotFound(format!("note {uid}")))?;

        let old_category = note.header.category;
        let old_project = note.header.project.clone();

        if let Some(title) = input.title {
            if title.trim().is_empty() {
                return Err(Error::SchemaValidation {
                    tool: self.name().to_string(),
                    detail: "title must not be empty".into(),
                });
            }
            note.header.title = title;
        }
        if let Some(content) = input.content {
            note.body = content;
        }
        if let Some(raw) = input.category.as_deref() {
            note.header.category = parse_category(self.name(), raw)?;
        }
        if let Some(tags) = input.tags {
            note.header.tags = tags;
        }
        if let Some(project) = input.project {
            note.header.project = (!project.trim().is_empty()).then_some(project);
        }

        ctx.store.save(&mut note, SaveOptions::default()).await?;

        let reason = if note.header.category != old_category {
            MoveReason::CategoryChange
        } else if note.header.project != old_project {
            MoveReason::ProjectChange
        } else {
            MoveReason::Manual
        };
        ctx.organizer.organize(&mut note, reason).await?;

        ctx.synchronizer.sync(&uid).await?;
        let refreshed = ctx
            .store
            .find_by_uid(&uid)
            .await?
            .ok_or_else(|| Error::Internal("updated note vanished".into()))?;
        ctx.engine.index_note(&refreshed).await?;

        Ok(json!({
            "id": refreshed.header.id,
            "title": refreshed.header.title,
            "category": refreshed.header.category,
            "path": refreshed.path,
            "updated": refreshed.header.updated,
        }))
    }
}

// =============================================================================
// delete_note
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct DeleteNoteInput {
    /// UID of the note to delete.
    id: String,
    /// Keep a `.bak` copy of the file.
    #[serde(default)]
    backup: bool,
}

struct DeleteNote;

#[async_trait]
impl Tool for DeleteNote {
    fn name(&self) -> &'static str {
        "delete_note"
    }

    fn description(&self) -> &'static str {
        "Delete a note, removing inbound references and all index state"
    }

    fn input_schema(&self) -> RootSchema {
        schemars::schema_for!(DeleteNoteInput)
    }

    fn validate(&self, input: &Value) -> Result<()> {
        parse_input::<DeleteNoteInput>(self.name(), input).map(|_| ())
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let input: DeleteNoteInput = parse_input(self.name(), &input)?;
        let uid = parse_uid(self.name(), &input.id)?;

        // Deleting a UID that no longer exists is a success, not an error.
        let Some(note) = ctx.store.find_by_uid(&uid).await? else {
            ctx.engine.remove_note(&uid).await?;
            return Ok(json!({ "id": uid, "deleted": false }));
        };

        ctx.store.delete(&note.path, input.backup).await?;
        let affected = ctx.synchronizer.cleanup(&uid).await?;
        ctx.engine.remove_note(&uid).await?;

        // Referencing notes changed on disk; bring their index rows along.
        for peer in &affected {
            if let Some(peer_note) = ctx.store.find_by_uid(peer).await? {
                ctx.engine.index_note(&peer_note).await?;
            }
        }

        Ok(json!({
            "id": uid,
            "deleted": true,
            "references_removed": affected.len(),
        }))
    }
}

// =============================================================================
// explore_links
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ExploreLinksInput {
    /// UID of the note to explore from.
    id: String,
    depth: Option<u32>,
    limit: Option<usize>,
    /// `outgoing`, `incoming`, or `both`.
    direction: Option<String>,
}

struct ExploreLinks;

#[async_trait]
impl Tool for ExploreLinks {
    fn name(&self) -> &'static str {
        "explore_links"
    }

    fn description(&self) -> &'static str {
        "Walk the link graph around a note: neighbors, backlinks, and scored traversal"
    }

    fn input_schema(&self) -> RootSchema {
        schemars::schema_for!(ExploreLinksInput)
    }

    fn validate(&self, input: &Value) -> Result<()> {
        parse_input::<ExploreLinksInput>(self.name(), input).map(|_| ())
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let input: ExploreLinksInput = parse_input(self.name(), &input)?;
        let uid = parse_uid(self.name(), &input.id)?;
        let direction = input
            .direction
            .as_deref()
            .map(Direction::from_str)
            .transpose()?
            .unwrap_or_default();

        let options = ConnectedOptions {
            depth: input.depth.unwrap_or(mementa_core::defaults::CONNECTED_DEPTH),
            limit: input.limit.unwrap_or(mementa_core::defaults::CONNECTED_LIMIT),
            direction,
        };
        let connected = ctx.engine.connected(&uid, &options).await?;
        let backlinks = ctx
            .engine
            .graph()
            .backlinks(&uid, mementa_core::defaults::GRAPH_LIMIT)
            .await?;
        let outbound = ctx
            .engine
            .graph()
            .outbound(&uid, mementa_core::defaults::GRAPH_LIMIT)
            .await?;

        Ok(json!({
            "id": uid,
            "connected": connected,
            "backlinks": backlinks,
            "outbound": outbound,
        }))
    }
}

// =============================================================================
// associative_search
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct AssociativeSearchInput {
    session_id: String,
    query: String,
    limit: Option<usize>,
    /// Blend weight of session affinity, 0.0..=1.0.
    strength: Option<f64>,
}

struct AssociativeSearch;

#[async_trait]
impl Tool for AssociativeSearch {
    fn name(&self) -> &'static str {
        "associative_search"
    }

    fn description(&self) -> &'static str {
        "Search reweighted by the session's recent notes and their neighborhoods"
    }

    fn input_schema(&self) -> RootSchema {
        schemars::schema_for!(AssociativeSearchInput)
    }

    fn validate(&self, input: &Value) -> Result<()> {
        let parsed = parse_input::<AssociativeSearchInput>(self.name(), input)?;
        if let Some(strength) = parsed.strength {
            if !(0.0..=1.0).contains(&strength) {
                return Err(Error::SchemaValidation {
                    tool: self.name().to_string(),
                    detail: format!("strength {strength} outside 0.0..=1.0"),
                });
            }
        }
        Ok(())
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let input: AssociativeSearchInput = parse_input(self.name(), &input)?;
        let options = AssociateOptions {
            limit: input.limit.unwrap_or(mementa_core::defaults::ASSOCIATE_LIMIT),
            strength: input
                .strength
                .unwrap_or(mementa_core::defaults::ASSOCIATE_STRENGTH),
        };

        let hits = ctx
            .sessions
            .associate(&ctx.engine, &input.session_id, &input.query, options)
            .await?;

        // The hits themselves become session history.
        for hit in &hits {
            ctx.sessions
                .record(&input.session_id, hit.uid.clone())
                .await;
        }

        Ok(json!({
            "session_id": input.session_id,
            "results": hits,
        }))
    }
}

// =============================================================================
// session_context
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct SessionContextInput {
    session_id: String,
    /// `get`, `reset`, or `record`.
    action: String,
    /// UID to record; required for `record`.
    id: Option<String>,
}

struct SessionContext;

#[async_trait]
impl Tool for SessionContext {
    fn name(&self) -> &'static str {
        "session_context"
    }

    fn description(&self) -> &'static str {
        "Inspect, reset, or append to a session's recent-note context"
    }

    fn input_schema(&self) -> RootSchema {
        schemars::schema_for!(SessionContextInput)
    }

    fn validate(&self, input: &Value) -> Result<()> {
        let parsed = parse_input::<SessionContextInput>(self.name(), input)?;
        match parsed.action.as_str() {
            "get" | "reset" => Ok(()),
            "record" => {
                if parsed.id.is_none() {
                    return Err(Error::SchemaValidation {
                        tool: self.name().to_string(),
                        detail: "record requires an id".into(),
                    });
                }
                Ok(())
            }
            other => Err(Error::SchemaValidation {
                tool: self.name().to_string(),
                detail: format!("unknown action: {other:?}"),
            }),
        }
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let input: SessionContextInput = parse_input(self.name(), &input)?;
        match input.action.as_str() {
            "get" => {
                let recent = ctx.sessions.ensure(&input.session_id).await;
                Ok(json!({ "session_id": input.session_id, "recent": recent }))
            }
            "reset" => {
                let existed = ctx.sessions.reset(&input.session_id).await;
                Ok(json!({ "session_id": input.session_id, "reset": existed }))
            }
            "record" => {
                let raw = input.id.ok_or_else(|| Error::SchemaValidation {
                    tool: self.name().to_string(),
                    detail: "record requires an id".into(),
                })?;
                let uid = parse_uid(self.name(), &raw)?;
                ctx.sessions.record(&input.session_id, uid.clone()).await;
                Ok(json!({ "session_id": input.session_id, "recorded": uid }))
            }
            other => Err(Error::InvalidRequest(format!(
                "unknown session action: {other:?}"
            ))),
        }
    }
}

// =============================================================================
// reflect_session
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ReflectSessionInput {
    session_id: String,
}

struct ReflectSession;

#[async_trait]
impl Tool for ReflectSession {
    fn name(&self) -> &'static str {
        "reflect_session"
    }

    fn description(&self) -> &'static str {
        "Summarize what a session has touched: recent notes and their link context"
    }

    fn input_schema(&self) -> RootSchema {
        schemars::schema_for!(ReflectSessionInput)
    }

    fn validate(&self, input: &Value) -> Result<()> {
        parse_input::<ReflectSessionInput>(self.name(), input).map(|_| ())
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value> {
        let input: ReflectSessionInput = parse_input(self.name(), &input)?;

        // Reflection over an unknown session is a request error, not an
        // implicit creation.
        let recent = ctx
            .sessions
            .get(&input.session_id)
            .await
            .ok_or_else(|| {
                Error::InvalidRequest(format!("unknown session: {:?}", input.session_id))
            })?;

        let mut notes = Vec::with_capacity(recent.len());
        for uid in &recent {
            let title = ctx.engine.note_title(uid).await?;
            let backlinks = ctx.engine.graph().backlinks(uid, 5).await?;
            notes.push(json!({
                "id": uid,
                "title": title,
                "backlink_count": backlinks.len(),
            }));
        }

        Ok(json!({
            "session_id": input.session_id,
            "recent_count": recent.len(),
            "notes": notes,
        }))
    }
}
