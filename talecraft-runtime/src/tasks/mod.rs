//! The background task system for document ingestion.
//!
//! Each task is one JSON file on disk, rewritten atomically at every
//! progress checkpoint so a restarted process can resume the workflow
//! from the last persisted milestone instead of starting over. The
//! source document travels inside the record (base64) until completion.
//!
//! Checkpoints: 10 init → 30 text extraction → 70 world documents
//! generated (file id known) → 75 source uploaded → 80 images
//! (skippable) → 85 world JSON uploaded → 90 title fetched → 95 record
//! created → 98 user linked → 100 done.

mod ingest;
mod record;

pub use ingest::{IngestBackend, WorldExtractor};
pub use record::{
    IngestOptions, TaskRecord, TaskState, COMPLETED_RETENTION_HOURS, FAILED_RETENTION_HOURS,
    STALE_AFTER_MINUTES,
};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use talecraft_core::world::Lore;
use talecraft_core::{DocKind, EngineError, GameStore, Result};

use crate::images::ImagePipeline;

/// Everything a running task needs: the engine store, the extractor and
/// the external collaborators.
pub struct IngestDeps {
    pub backend: Arc<dyn IngestBackend>,
    pub extractor: WorldExtractor,
    pub store: GameStore,
    pub images: Option<Arc<ImagePipeline>>,
}

/// Per-user task listing, categorized by effective state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOverview {
    pub processing: Vec<TaskRecord>,
    pub completed: Vec<TaskRecord>,
    pub failed: Vec<TaskRecord>,
    pub interrupted: Vec<TaskRecord>,
}

type TaskSlot = Arc<Mutex<TaskRecord>>;

/// Owns task records and their worker tasks.
pub struct TaskManager {
    dir: PathBuf,
    tasks: Mutex<HashMap<String, TaskSlot>>,
    deps: Arc<IngestDeps>,
}

struct TaskContext {
    dir: PathBuf,
    slot: TaskSlot,
    deps: Arc<IngestDeps>,
}

impl TaskManager {
    /// `dir` is the task-store directory (one JSON per task).
    pub fn new(dir: impl Into<PathBuf>, deps: IngestDeps) -> Self {
        Self {
            dir: dir.into(),
            tasks: Mutex::new(HashMap::new()),
            deps: Arc::new(deps),
        }
    }

    /// Scan the task directory on startup: deletes expired terminal
    /// records, loads the rest, and relaunches every non-terminal task
    /// from its last checkpoint. Returns the number relaunched.
    pub async fn recover(&self) -> Result<usize> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut relaunched = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let record = match read_record(&path).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable task record");
                    continue;
                }
            };
            if record.expired(Utc::now()) {
                let _ = tokio::fs::remove_file(&path).await;
                continue;
            }
            let resume = matches!(record.state, TaskState::Pending | TaskState::Processing);
            let task_id = record.task_id.clone();
            let slot: TaskSlot = Arc::new(Mutex::new(record));
            self.tasks.lock().await.insert(task_id.clone(), slot.clone());
            if resume {
                info!(task = %task_id, "relaunching interrupted task");
                self.spawn_run(slot);
                relaunched += 1;
            }
        }
        Ok(relaunched)
    }

    /// Create and launch a new ingest task; returns its id.
    pub async fn create_task(
        &self,
        user_id: &str,
        file_bytes: &[u8],
        options: IngestOptions,
    ) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let record = TaskRecord::new(user_id, BASE64.encode(file_bytes), options);
        let task_id = record.task_id.clone();
        write_record(&self.dir, &record).await?;

        let slot: TaskSlot = Arc::new(Mutex::new(record));
        self.tasks.lock().await.insert(task_id.clone(), slot.clone());
        self.spawn_run(slot);
        Ok(task_id)
    }

    /// Fetch a task record with its effective (staleness-derived) state.
    pub async fn get_task(&self, task_id: &str) -> Result<TaskRecord> {
        let slot = self.slot(task_id).await?;
        let record = slot.lock().await;
        let mut reported = record.clone();
        reported.state = record.effective_state(Utc::now());
        Ok(reported)
    }

    /// Relaunch a task that is interrupted or failed.
    pub async fn resume_task(&self, task_id: &str) -> Result<()> {
        let slot = self.slot(task_id).await?;
        {
            let mut record = slot.lock().await;
            let effective = record.effective_state(Utc::now());
            if !matches!(effective, TaskState::Interrupted | TaskState::Failed) {
                return Err(EngineError::validation(format!(
                    "task {task_id} is {effective:?}; only interrupted or failed tasks can be resumed"
                )));
            }
            // Steps before the source upload need the original bytes.
            if record.progress < 75 && record.file_data_base64.is_none() {
                return Err(EngineError::TaskRecovery(format!(
                    "task {task_id}: source document bytes are no longer available"
                )));
            }
            let progress = record.progress;
            record.error = None;
            record.checkpoint(progress, "resuming");
            write_record(&self.dir, &record).await?;
        }
        self.spawn_run(slot);
        Ok(())
    }

    /// All of a user's tasks, categorized.
    pub async fn list_tasks_by_user(&self, user_id: &str) -> Result<TaskOverview> {
        // Pick up records written by earlier processes that recover()
        // has not loaded.
        if tokio::fs::try_exists(&self.dir).await.unwrap_or(false) {
            let mut entries = tokio::fs::read_dir(&self.dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Ok(record) = read_record(&path).await {
                    let mut tasks = self.tasks.lock().await;
                    tasks
                        .entry(record.task_id.clone())
                        .or_insert_with(|| Arc::new(Mutex::new(record)));
                }
            }
        }

        let now = Utc::now();
        let mut overview = TaskOverview::default();
        let slots: Vec<TaskSlot> = self.tasks.lock().await.values().cloned().collect();
        for slot in slots {
            let record = slot.lock().await;
            if record.user_id != user_id {
                continue;
            }
            let mut reported = record.clone();
            reported.state = record.effective_state(now);
            match reported.state {
                TaskState::Pending | TaskState::Processing => overview.processing.push(reported),
                TaskState::Completed => overview.completed.push(reported),
                TaskState::Failed => overview.failed.push(reported),
                TaskState::Interrupted => overview.interrupted.push(reported),
            }
        }
        Ok(overview)
    }

    async fn slot(&self, task_id: &str) -> Result<TaskSlot> {
        if let Some(slot) = self.tasks.lock().await.get(task_id).cloned() {
            return Ok(slot);
        }
        let path = self.dir.join(format!("{task_id}.json"));
        let record = read_record(&path)
            .await
            .map_err(|_| EngineError::not_found("task", task_id))?;
        let slot: TaskSlot = Arc::new(Mutex::new(record));
        self.tasks
            .lock()
            .await
            .insert(task_id.to_string(), slot.clone());
        Ok(slot)
    }

    fn spawn_run(&self, slot: TaskSlot) {
        let ctx = TaskContext {
            dir: self.dir.clone(),
            slot,
            deps: Arc::clone(&self.deps),
        };
        tokio::spawn(async move {
            run_task(ctx).await;
        });
    }
}

/// Drive one task to a terminal state, recording failures.
async fn run_task(ctx: TaskContext) {
    if let Err(e) = run_steps(&ctx).await {
        warn!(error = %e, "ingest task failed");
        let mut record = ctx.slot.lock().await;
        record.fail(e.to_string());
        if let Err(write_error) = write_record(&ctx.dir, &record).await {
            warn!(error = %write_error, "failed to persist task failure");
        }
    }
}

/// The checkpointed workflow. Every step is guarded by the persisted
/// progress, so a resumed task never re-executes finished steps.
async fn run_steps(ctx: &TaskContext) -> Result<()> {
    let (mut progress, options, file_data, mut file_id, user_id) = {
        let record = ctx.slot.lock().await;
        (
            record.progress,
            record.options.clone(),
            record.file_data_base64.clone(),
            record.file_id.clone(),
            record.user_id.clone(),
        )
    };

    let bytes = if progress < 75 {
        let encoded = file_data.ok_or_else(|| {
            EngineError::TaskRecovery("source document bytes are no longer available".to_string())
        })?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| EngineError::validation(format!("corrupt task file data: {e}")))?
    } else {
        Vec::new()
    };

    if progress < 10 {
        checkpoint(ctx, 10, "initializing", |_| {}).await?;
        progress = 10;
    }

    if progress < 70 {
        checkpoint(ctx, 30, "extracting document text", |_| {}).await?;
        let text = ctx.deps.backend.extract_text(&bytes).await?;

        let world = ctx.deps.extractor.extract(&text).await?;
        let id = Uuid::new_v4().simple().to_string();
        ctx.deps
            .store
            .save_template(DocKind::Lore, &id, &world.lore)
            .await?;
        ctx.deps
            .store
            .save_template(DocKind::Player, &id, &world.player)
            .await?;
        ctx.deps
            .store
            .save_template(DocKind::Items, &id, &world.items)
            .await?;
        ctx.deps
            .store
            .save_template(DocKind::Scenes, &id, &world.scenes)
            .await?;

        let id_for_record = id.clone();
        checkpoint(ctx, 70, "world documents generated", move |record| {
            record.file_id = Some(id_for_record);
        })
        .await?;
        file_id = Some(id);
        progress = 70;
    }
    let file_id = file_id.ok_or_else(|| {
        EngineError::TaskRecovery("task lost its file id before upload".to_string())
    })?;

    if progress < 75 {
        ctx.deps.backend.upload_source(&file_id, &bytes).await?;
        checkpoint(ctx, 75, "source document uploaded", |_| {}).await?;
        progress = 75;
    }

    if progress < 80 {
        if options.generate_images {
            if let Some(images) = &ctx.deps.images {
                let report = images
                    .generate_all_game_images(&file_id, options.image_options)
                    .await?;
                if !report.errors.is_empty() {
                    warn!(errors = report.errors.len(), "image generation incomplete");
                }
                ctx.deps.backend.upload_images(&file_id).await?;
            }
        }
        checkpoint(ctx, 80, "images uploaded", |_| {}).await?;
        progress = 80;
    }

    if progress < 85 {
        ctx.deps.backend.upload_world_json(&file_id).await?;
        checkpoint(ctx, 85, "world documents uploaded", |_| {}).await?;
        progress = 85;
    }

    let lore: Lore = ctx.deps.store.load_template(DocKind::Lore, &file_id).await?;
    let title = lore.title.clone();
    let description = lore.background.first().cloned().unwrap_or_default();
    if progress < 90 {
        checkpoint(ctx, 90, "title and description fetched", |_| {}).await?;
        progress = 90;
    }

    if progress < 95 {
        ctx.deps
            .backend
            .create_record(&file_id, &user_id, &title, &description)
            .await?;
        checkpoint(ctx, 95, "database record created", |_| {}).await?;
        progress = 95;
    }

    if progress < 98 {
        ctx.deps.backend.link_user(&user_id, &file_id).await?;
        checkpoint(ctx, 98, "user file list updated", |_| {}).await?;
    }

    let mut record = ctx.slot.lock().await;
    record.complete(serde_json::json!({
        "fileId": file_id,
        "title": title,
        "description": description,
    }));
    write_record(&ctx.dir, &record).await?;
    info!(task = %record.task_id, file = %file_id, "ingest task completed");
    Ok(())
}

async fn checkpoint(
    ctx: &TaskContext,
    progress: u8,
    message: &str,
    mutate: impl FnOnce(&mut TaskRecord),
) -> Result<()> {
    let mut record = ctx.slot.lock().await;
    record.checkpoint(progress, message);
    mutate(&mut record);
    write_record(&ctx.dir, &record).await
}

async fn write_record(dir: &Path, record: &TaskRecord) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.json", record.task_id));
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(record)?).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

async fn read_record(path: &Path) -> Result<TaskRecord> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
