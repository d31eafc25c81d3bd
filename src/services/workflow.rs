use crate::core::config::Config;
use crate::core::error::WorkflowError;
use crate::core::io::Storage;
use crate::core::state::{Board, Character, SceneResult};
use crate::services::characters::CharacterStore;
use crate::services::generator::{generate_scene_image, ImageGenerator};
use crate::services::script::split_scenes;
use anyhow::Result;
use log::{info, warn};
use tokio::sync::watch;

/// Drives one generation run at a time and publishes per-scene state through a watch channel.
pub struct WorkflowManager {
    generator: Box<dyn ImageGenerator>,
    board: watch::Sender<Board>,
}

impl WorkflowManager {
    pub fn new(generator: Box<dyn ImageGenerator>) -> Self {
        let (board, _) = watch::channel(Board::default());
        Self { generator, board }
    }

    pub fn subscribe(&self) -> watch::Receiver<Board> {
        self.board.subscribe()
    }

    pub fn board(&self) -> Board {
        self.board.borrow().clone()
    }

    pub fn is_generating(&self) -> bool {
        self.board.borrow().generating
    }

    /// Generates every scene of `story` in order, one at a time.
    ///
    /// All results are published as loading before the first call. Each scene then resolves
    /// on its own; a failed scene never stops the ones after it. Fails only when another
    /// run is still in progress.
    pub async fn run(&self, story: &str, characters: Vec<Character>) -> Result<Vec<SceneResult>> {
        let scenes = split_scenes(story);
        let initial: Vec<SceneResult> = scenes
            .iter()
            .enumerate()
            .map(|(i, prompt)| SceneResult::loading(i + 1, prompt.clone()))
            .collect();

        let started = self.board.send_if_modified(|board| {
            if board.generating {
                return false;
            }
            board.results = initial;
            board.generating = true;
            true
        });
        if !started {
            return Err(WorkflowError::RunInProgress.into());
        }
        let _running = RunningFlag { board: &self.board };

        info!(
            "Starting generation: {} scene(s), {} character(s)",
            scenes.len(),
            characters.len()
        );

        let total = scenes.len();
        for (i, prompt) in scenes.iter().enumerate() {
            info!("Generating scene {}/{}", i + 1, total);
            let outcome = generate_scene_image(prompt, &characters, self.generator.as_ref()).await;
            if let Err(e) = &outcome {
                warn!("Scene {} failed: {}", i + 1, e);
            }

            self.board.send_modify(|board| {
                if let Some(result) = board.results.get_mut(i) {
                    match outcome {
                        Ok(image_url) => result.succeed(image_url),
                        Err(e) => result.fail(e.to_string()),
                    };
                }
            });
        }

        let finished = self.board.borrow().results.clone();
        info!("Generation finished");
        Ok(finished)
    }
}

/// Clears `generating` when a run ends, including when its future is dropped mid-scene.
struct RunningFlag<'a> {
    board: &'a watch::Sender<Board>,
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.board.send_modify(|board| board.generating = false);
    }
}

/// Everything the presentation layer edits: characters, story text, and the run state.
pub struct Storyboard {
    characters: CharacterStore,
    story: String,
    workflow: WorkflowManager,
}

impl Storyboard {
    pub fn new(generator: Box<dyn ImageGenerator>) -> Self {
        Self {
            characters: CharacterStore::new(),
            story: String::new(),
            workflow: WorkflowManager::new(generator),
        }
    }

    /// Builds a storyboard from the characters and story in the config.
    ///
    /// Characters whose image cannot be read are kept without one.
    pub async fn from_config(
        config: &Config,
        storage: &dyn Storage,
        generator: Box<dyn ImageGenerator>,
    ) -> Result<Self> {
        let mut storyboard = Self::new(generator);
        storyboard.set_story(config.story_text()?);

        for entry in &config.characters {
            let store = storyboard.characters_mut();
            let id = store.add();
            store.set_name(id, entry.name.clone());
            store.set_description(id, entry.description.clone());
            if let Some(image) = &entry.image {
                if !store.replace_image(id, storage, image).await {
                    warn!("Character {:?} has no usable reference image", entry.name);
                }
            }
        }

        Ok(storyboard)
    }

    pub fn characters(&self) -> &CharacterStore {
        &self.characters
    }

    pub fn characters_mut(&mut self) -> &mut CharacterStore {
        &mut self.characters
    }

    pub fn story(&self) -> &str {
        &self.story
    }

    pub fn set_story(&mut self, story: impl Into<String>) {
        self.story = story.into();
    }

    pub fn subscribe(&self) -> watch::Receiver<Board> {
        self.workflow.subscribe()
    }

    pub fn board(&self) -> Board {
        self.workflow.board()
    }

    pub fn is_generating(&self) -> bool {
        self.workflow.is_generating()
    }

    /// Snapshots the current characters and story, then runs every scene.
    pub async fn generate(&self) -> Result<Vec<SceneResult>> {
        let story = self.story.clone();
        let characters = self.characters.snapshot();
        self.workflow.run(&story, characters).await
    }
}
