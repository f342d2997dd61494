//! The image pipeline: bounded-parallel synthesis of NPC, scene,
//! building, world and player images, with in-place scenes-document
//! updates.
//!
//! Every element request runs concurrently; failures are collected into
//! the report's `errors` list and never fail the overall call. Each
//! produced image is written to a temp file, scaled to the element's
//! target width, renamed into place, and the temp file removed with a
//! short retry loop (filesystem locks may linger momentarily).

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use openai::{ImageQuality, ImageRequest, ImageSize, OpenAi};
use talecraft_core::world::{Lore, Player, SceneMap};
use talecraft_core::{DocKind, EngineError, GameStore, Result};

/// Target widths per asset class, in pixels.
const NPC_WIDTH: u32 = 300;
const SCENE_WIDTH: u32 = 1000;
const BUILDING_WIDTH: u32 = 300;
const PORTRAIT_WIDTH: u32 = 500;

/// Temp-file deletion retry policy.
const TEMP_DELETE_ATTEMPTS: u32 = 5;
const TEMP_DELETE_BACKOFF: Duration = Duration::from_millis(100);

/// Which asset classes to generate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOptions {
    pub generate_npcs: bool,
    pub generate_scenes: bool,
    pub generate_buildings: bool,
    pub generate_world: bool,
    pub generate_user: bool,
    /// Write generated paths back into the scenes document.
    pub update_json: bool,
}

impl ImageOptions {
    pub fn all() -> Self {
        Self {
            generate_npcs: true,
            generate_scenes: true,
            generate_buildings: true,
            generate_world: true,
            generate_user: true,
            update_json: true,
        }
    }

    pub fn none() -> Self {
        Self {
            generate_npcs: false,
            generate_scenes: false,
            generate_buildings: false,
            generate_world: false,
            generate_user: false,
            update_json: false,
        }
    }
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self::all()
    }
}

/// One successfully produced image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
}

/// The pipeline result; partial failure is reported, not raised.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReport {
    pub npcs: Vec<GeneratedImage>,
    pub scenes: Vec<GeneratedImage>,
    pub buildings: Vec<GeneratedImage>,
    pub world: Option<GeneratedImage>,
    pub user: Option<GeneratedImage>,
    pub errors: Vec<String>,
}

/// Produces raw image bytes for a prompt. Production goes through the
/// image endpoint and downloads the returned URL; tests stub this.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn produce(&self, prompt: &str, size: ImageSize) -> Result<Vec<u8>>;
}

/// Image endpoint + download, the production [`ImageSource`].
pub struct OpenAiImageSource {
    client: OpenAi,
    http: reqwest::Client,
}

impl OpenAiImageSource {
    pub fn new(client: OpenAi) -> Self {
        Self {
            client,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ImageSource for OpenAiImageSource {
    async fn produce(&self, prompt: &str, size: ImageSize) -> Result<Vec<u8>> {
        let url = self
            .client
            .generate_image(
                ImageRequest::new(prompt)
                    .with_size(size)
                    .with_quality(ImageQuality::Standard),
            )
            .await?;
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(openai::Error::Http)?;
        let bytes = response.bytes().await.map_err(openai::Error::Http)?;
        Ok(bytes.to_vec())
    }
}

/// Lore facts folded into every element prompt.
#[derive(Debug, Clone, Default)]
pub struct LoreContext {
    pub era: String,
    pub time_period: String,
    pub key_elements: Vec<String>,
}

/// Visual keywords scanned for in the lore background.
const VISUAL_KEYWORDS: &[&str] = &[
    "castle", "forest", "sea", "desert", "mountain", "village", "city", "river", "island",
    "temple", "harbor", "snow", "jungle", "ruins", "mine", "tower", "swamp", "plains",
];

impl LoreContext {
    /// Extract era, period and key visual elements by keyword heuristics.
    pub fn from_lore(lore: &Lore) -> Self {
        let background = lore.background.join(" ").to_lowercase();
        let key_elements = VISUAL_KEYWORDS
            .iter()
            .filter(|k| background.contains(**k))
            .map(|k| k.to_string())
            .collect();
        Self {
            era: lore
                .current_era()
                .map(|e| e.title.clone())
                .unwrap_or_default(),
            time_period: lore.time_period.clone(),
            key_elements,
        }
    }

    fn phrase(&self) -> String {
        let mut parts = Vec::new();
        if !self.time_period.is_empty() {
            parts.push(format!("{} setting", self.time_period));
        }
        if !self.era.is_empty() {
            parts.push(self.era.clone());
        }
        if !self.key_elements.is_empty() {
            parts.push(format!("featuring {}", self.key_elements.join(", ")));
        }
        parts.join(", ")
    }
}

/// One synthesis job.
struct Job {
    id: String,
    name: String,
    prompt: String,
    size: ImageSize,
    width: u32,
    dest: PathBuf,
}

/// The image pipeline over a game store.
pub struct ImagePipeline {
    source: Arc<dyn ImageSource>,
    store: GameStore,
}

impl ImagePipeline {
    pub fn new(source: Arc<dyn ImageSource>, store: GameStore) -> Self {
        Self { source, store }
    }

    fn images_dir(&self, file_id: &str) -> PathBuf {
        self.store.root().join("images").join(file_id)
    }

    /// Generate all requested asset classes for a world template.
    pub async fn generate_all_game_images(
        &self,
        file_id: &str,
        options: ImageOptions,
    ) -> Result<ImageReport> {
        let lore: Lore = self.store.load_template(DocKind::Lore, file_id).await?;
        let mut scenes: SceneMap = self.store.load_template(DocKind::Scenes, file_id).await?;
        let player: Player = self.store.load_template(DocKind::Player, file_id).await?;
        let context = LoreContext::from_lore(&lore);

        let dir = self.images_dir(file_id);
        let mut report = ImageReport::default();

        let mut npc_jobs = Vec::new();
        let mut scene_jobs = Vec::new();
        let mut building_jobs = Vec::new();

        if options.generate_npcs {
            for scene in scenes.scenes.values() {
                for npc in &scene.npcs {
                    npc_jobs.push(Job {
                        id: npc.id.clone(),
                        name: npc.name.clone(),
                        prompt: npc_prompt(&context, npc),
                        size: ImageSize::Square1024,
                        width: NPC_WIDTH,
                        dest: dir.join("avatars").join(format!("{}.png", npc.id)),
                    });
                }
            }
        }
        if options.generate_scenes {
            for (scene_id, scene) in &scenes.scenes {
                scene_jobs.push(Job {
                    id: scene_id.clone(),
                    name: scene.name.clone(),
                    prompt: scene_prompt(&context, &scene.name, &scene.description),
                    size: ImageSize::Wide1792,
                    width: SCENE_WIDTH,
                    dest: dir.join("scenes").join(format!("{scene_id}.png")),
                });
            }
        }
        if options.generate_buildings {
            for scene in scenes.scenes.values() {
                for building in &scene.buildings {
                    building_jobs.push(Job {
                        id: building.id.clone(),
                        name: building.name.clone(),
                        prompt: building_prompt(&context, building),
                        size: ImageSize::Square1024,
                        width: BUILDING_WIDTH,
                        dest: dir.join("icons").join(format!("{}.png", building.id)),
                    });
                }
            }
        }

        // All element requests dispatch concurrently; the client's own
        // connection pool bounds parallelism.
        let (npcs, scene_images, buildings) = futures::join!(
            self.run_jobs(npc_jobs),
            self.run_jobs(scene_jobs),
            self.run_jobs(building_jobs),
        );
        report.npcs = npcs.0;
        report.scenes = scene_images.0;
        report.buildings = buildings.0;
        report.errors.extend(npcs.1);
        report.errors.extend(scene_images.1);
        report.errors.extend(buildings.1);

        if options.generate_world {
            let job = Job {
                id: format!("world_{file_id}"),
                name: lore.title.clone(),
                prompt: world_prompt(&context, &lore),
                size: ImageSize::Wide1792,
                width: PORTRAIT_WIDTH,
                dest: self
                    .store
                    .root()
                    .join("images")
                    .join(format!("world_{file_id}.png")),
            };
            match self.run_job(&job).await {
                Ok(done) => report.world = Some(done),
                Err(e) => report.errors.push(format!("world: {e}")),
            }
        }
        if options.generate_user {
            let job = Job {
                id: format!("player_{file_id}"),
                name: player.profile.name.clone(),
                prompt: player_prompt(&context, &player),
                size: ImageSize::Square1024,
                width: PORTRAIT_WIDTH,
                dest: self
                    .store
                    .root()
                    .join("images")
                    .join(format!("player_{file_id}.png")),
            };
            match self.run_job(&job).await {
                Ok(done) => report.user = Some(done),
                Err(e) => report.errors.push(format!("player: {e}")),
            }
        }

        if options.update_json {
            apply_report_to_scenes(&mut scenes, &report);
            self.store
                .save_template(DocKind::Scenes, file_id, &scenes)
                .await?;
        }

        info!(
            file = %file_id,
            images = report.npcs.len() + report.scenes.len() + report.buildings.len(),
            errors = report.errors.len(),
            "image generation finished"
        );
        Ok(report)
    }

    async fn run_jobs(&self, jobs: Vec<Job>) -> (Vec<GeneratedImage>, Vec<String>) {
        let results =
            futures::future::join_all(jobs.iter().map(|job| self.run_job(job))).await;
        let mut done = Vec::new();
        let mut errors = Vec::new();
        for (job, result) in jobs.iter().zip(results) {
            match result {
                Ok(image) => done.push(image),
                Err(e) => errors.push(format!("{} ({}): {e}", job.name, job.id)),
            }
        }
        (done, errors)
    }

    async fn run_job(&self, job: &Job) -> Result<GeneratedImage> {
        let bytes = self.source.produce(&job.prompt, job.size).await?;
        persist_scaled(&bytes, &job.dest, job.width).await?;
        Ok(GeneratedImage {
            id: job.id.clone(),
            name: job.name.clone(),
            path: job.dest.clone(),
        })
    }
}

/// Write raw bytes to a temp file, scale to the target width, rename the
/// scaled output into place, and remove the temp with retries.
pub async fn persist_scaled(bytes: &[u8], dest: &Path, width: u32) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let download = dest.with_extension("download");
    tokio::fs::write(&download, bytes).await?;

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| EngineError::validation(format!("image decode failed: {e}")))?;
    let scaled = if decoded.width() > width {
        let height =
            ((u64::from(decoded.height()) * u64::from(width)) / u64::from(decoded.width())).max(1);
        decoded.resize_exact(width, height as u32, FilterType::Lanczos3)
    } else {
        decoded
    };

    let mut encoded = Vec::new();
    scaled
        .write_to(&mut Cursor::new(&mut encoded), image::ImageFormat::Png)
        .map_err(|e| EngineError::validation(format!("image encode failed: {e}")))?;

    let tmp = dest.with_extension("png.tmp");
    tokio::fs::write(&tmp, &encoded).await?;
    tokio::fs::rename(&tmp, dest).await?;

    remove_with_retry(&download).await;
    Ok(())
}

/// Temp deletion can hit lingering filesystem locks; retry briefly.
async fn remove_with_retry(path: &Path) {
    for attempt in 1..=TEMP_DELETE_ATTEMPTS {
        match tokio::fs::remove_file(path).await {
            Ok(()) => return,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                if attempt == TEMP_DELETE_ATTEMPTS {
                    warn!(path = %path.display(), error = %e, "temp file not removed");
                } else {
                    tokio::time::sleep(TEMP_DELETE_BACKOFF).await;
                }
            }
        }
    }
}

/// Write generated paths into the scenes document.
fn apply_report_to_scenes(scenes: &mut SceneMap, report: &ImageReport) {
    for generated in &report.scenes {
        if let Some(scene) = scenes.scenes.get_mut(&generated.id) {
            scene.background = Some(generated.path.display().to_string());
        }
    }
    for scene in scenes.scenes.values_mut() {
        for npc in &mut scene.npcs {
            if let Some(generated) = report.npcs.iter().find(|g| g.id == npc.id) {
                npc.icon = Some(generated.path.display().to_string());
            }
        }
        for building in &mut scene.buildings {
            if let Some(generated) = report.buildings.iter().find(|g| g.id == building.id) {
                building.icon = Some(generated.path.display().to_string());
            }
        }
    }
}

fn npc_prompt(context: &LoreContext, npc: &talecraft_core::world::Npc) -> String {
    let job = npc.job.as_deref().unwrap_or("commoner");
    format!(
        "Portrait of {}, a {} in a {}. {}. Painterly game avatar, head and \
         shoulders, neutral background.",
        npc.name,
        job,
        context.phrase(),
        npc.description
    )
}

fn scene_prompt(context: &LoreContext, name: &str, description: &str) -> String {
    format!(
        "Wide establishing shot of {name}: {description}. {}. Painterly game \
         background, no text, no characters in focus.",
        context.phrase()
    )
}

fn building_prompt(
    context: &LoreContext,
    building: &talecraft_core::world::Building,
) -> String {
    format!(
        "Icon of {}, a {} building. {}. {}. Clean game icon, centered, plain \
         background.",
        building.name,
        building.building_type,
        building.description,
        context.phrase()
    )
}

fn world_prompt(context: &LoreContext, lore: &Lore) -> String {
    format!(
        "Key art for the world of {}: {}. {}. Epic painterly wide shot, no text.",
        lore.title,
        lore.background_summary(300),
        context.phrase()
    )
}

fn player_prompt(context: &LoreContext, player: &Player) -> String {
    format!(
        "Portrait of {}, {} protagonist, age {}. {}. Painterly game portrait, \
         head and shoulders.",
        player.profile.name,
        player.profile.gender,
        player.profile.age,
        context.phrase()
    )
}
