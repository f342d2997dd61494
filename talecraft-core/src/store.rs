//! The game data store: typed JSON documents on disk.
//!
//! Documents live under `{root}/game_data/` as `{prefix}_{id}.json`. The
//! same four world documents exist per file id (the reusable template)
//! and per session id (the running instance). Session reads fall back to
//! the template until the session has been materialized.
//!
//! Writes are whole-document replacements made atomic against concurrent
//! readers by writing to a temp file and renaming it into place.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::world::{ItemCatalog, Lore, Player, SceneMap, WorldDocs};

/// Which of the four world documents is being addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    Lore,
    Player,
    Items,
    Scenes,
}

impl DocKind {
    /// File name prefix for this document kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DocKind::Lore => "lore",
            DocKind::Player => "player",
            DocKind::Items => "items",
            DocKind::Scenes => "scenes",
        }
    }
}

/// On-disk store for world documents and session auxiliaries.
#[derive(Debug, Clone)]
pub struct GameStore {
    root: PathBuf,
}

impl GameStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding all JSON documents.
    pub fn game_data_dir(&self) -> PathBuf {
        self.root.join("game_data")
    }

    /// Root directory of the store (images and tasks live beside game_data).
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_path(&self, kind: DocKind, id: &str) -> PathBuf {
        self.game_data_dir()
            .join(format!("{}_{}.json", kind.prefix(), id))
    }

    fn aux_path(&self, name: &str) -> PathBuf {
        self.game_data_dir().join(format!("{name}.json"))
    }

    /// Load a template document.
    pub async fn load_template<T: DeserializeOwned>(
        &self,
        kind: DocKind,
        file_id: &str,
    ) -> Result<T> {
        match self.read_json(&self.doc_path(kind, file_id)).await? {
            Some(value) => Ok(value),
            None => Err(EngineError::not_found(kind.prefix(), file_id)),
        }
    }

    /// Load a session document, falling back to the template namespace
    /// until the session has been materialized.
    pub async fn load_session<T: DeserializeOwned>(
        &self,
        kind: DocKind,
        session_id: &str,
        file_id: &str,
    ) -> Result<T> {
        if let Some(value) = self.read_json(&self.doc_path(kind, session_id)).await? {
            return Ok(value);
        }
        self.load_template(kind, file_id).await
    }

    /// Replace a session document atomically.
    pub async fn save_session<T: Serialize>(
        &self,
        kind: DocKind,
        session_id: &str,
        value: &T,
    ) -> Result<()> {
        self.write_json(&self.doc_path(kind, session_id), value)
            .await
    }

    /// Replace a template document atomically.
    pub async fn save_template<T: Serialize>(
        &self,
        kind: DocKind,
        file_id: &str,
        value: &T,
    ) -> Result<()> {
        self.write_json(&self.doc_path(kind, file_id), value).await
    }

    /// Whether the session namespace has been materialized.
    pub async fn exists_session(&self, session_id: &str) -> bool {
        tokio::fs::try_exists(self.doc_path(DocKind::Player, session_id))
            .await
            .unwrap_or(false)
    }

    /// Whether a template exists for the given file id.
    pub async fn exists_template(&self, file_id: &str) -> bool {
        tokio::fs::try_exists(self.doc_path(DocKind::Lore, file_id))
            .await
            .unwrap_or(false)
    }

    /// Copy the four world documents from the template namespace into the
    /// session namespace, returning the cloned values.
    pub async fn materialize_session_from_template(
        &self,
        session_id: &str,
        file_id: &str,
    ) -> Result<WorldDocs> {
        let lore: Lore = self.load_template(DocKind::Lore, file_id).await?;
        let player: Player = self.load_template(DocKind::Player, file_id).await?;
        let items: ItemCatalog = self.load_template(DocKind::Items, file_id).await?;
        let scenes: SceneMap = self.load_template(DocKind::Scenes, file_id).await?;

        self.save_session(DocKind::Lore, session_id, &lore).await?;
        self.save_session(DocKind::Player, session_id, &player)
            .await?;
        self.save_session(DocKind::Items, session_id, &items)
            .await?;
        self.save_session(DocKind::Scenes, session_id, &scenes)
            .await?;

        Ok(WorldDocs {
            lore,
            player,
            items,
            scenes,
        })
    }

    /// Load all four world documents for a session (with template fallback).
    pub async fn load_world(&self, session_id: &str, file_id: &str) -> Result<WorldDocs> {
        Ok(WorldDocs {
            lore: self.load_session(DocKind::Lore, session_id, file_id).await?,
            player: self
                .load_session(DocKind::Player, session_id, file_id)
                .await?,
            items: self
                .load_session(DocKind::Items, session_id, file_id)
                .await?,
            scenes: self
                .load_session(DocKind::Scenes, session_id, file_id)
                .await?,
        })
    }

    /// Load an auxiliary document (session snapshot, history, NPC chat).
    pub async fn load_aux<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.read_json(&self.aux_path(name)).await
    }

    /// Replace an auxiliary document atomically.
    pub async fn save_aux<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        self.write_json(&self.aux_path(name), value).await
    }

    /// Remove an auxiliary document if it exists.
    pub async fn remove_aux(&self, name: &str) -> Result<()> {
        match tokio::fs::remove_file(self.aux_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
