use crate::core::io::Storage;
use crate::core::state::{BaseImage, Character};
use crate::services::image::{ingest_data_url, ingest_image};
use anyhow::Result;
use log::{debug, warn};
use uuid::Uuid;

/// Ordered, in-memory collection of the characters defined for a story.
#[derive(Debug, Default, Clone)]
pub struct CharacterStore {
    characters: Vec<Character>,
}

impl CharacterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an empty character slot and returns its id.
    pub fn add(&mut self) -> Uuid {
        let character = Character::new();
        let id = character.id;
        self.characters.push(character);
        id
    }

    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.characters.len();
        self.characters.retain(|c| c.id != id);
        self.characters.len() != before
    }

    pub fn get(&self, id: Uuid) -> Option<&Character> {
        self.characters.iter().find(|c| c.id == id)
    }

    pub fn all(&self) -> &[Character] {
        &self.characters
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    /// Owned copy for a generation run; later edits do not reach it.
    pub fn snapshot(&self) -> Vec<Character> {
        self.characters.clone()
    }

    pub fn set_name(&mut self, id: Uuid, name: impl Into<String>) -> bool {
        match self.get_mut(id) {
            Some(c) => {
                c.name = name.into();
                true
            }
            None => false,
        }
    }

    pub fn set_description(&mut self, id: Uuid, description: impl Into<String>) -> bool {
        match self.get_mut(id) {
            Some(c) => {
                c.description = description.into();
                true
            }
            None => false,
        }
    }

    /// Replaces the reference portrait from an image file.
    ///
    /// The store stays borrowed until ingestion finishes, so the image lands on the
    /// character as it was when the call started. Returns false and leaves the store
    /// untouched when the id is unknown or the file cannot be ingested.
    pub async fn replace_image(&mut self, id: Uuid, storage: &dyn Storage, path: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        let ingested = ingest_image(storage, path).await;
        self.apply_image(id, ingested, path)
    }

    /// Same as [`replace_image`](Self::replace_image) for an already-read data URL.
    pub fn replace_image_data_url(&mut self, id: Uuid, data_url: &str, preview: &str) -> bool {
        let ingested = ingest_data_url(data_url, preview);
        self.apply_image(id, ingested, preview)
    }

    fn apply_image(&mut self, id: Uuid, ingested: Result<BaseImage>, source: &str) -> bool {
        let image = match ingested {
            Ok(image) => image,
            Err(e) => {
                warn!("Could not read image {} for character {}: {:#}", source, id, e);
                return false;
            }
        };
        match self.get_mut(id) {
            Some(c) => {
                debug!("Updated reference image for {:?} ({})", c.name, image.mime_type);
                c.base_image = image;
                true
            }
            None => false,
        }
    }

    fn get_mut(&mut self, id: Uuid) -> Option<&mut Character> {
        self.characters.iter_mut().find(|c| c.id == id)
    }
}
