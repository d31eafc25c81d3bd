use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BaseImage {
    /// Base64 payload of the reference portrait. Empty when no image is set.
    pub data: String,
    pub mime_type: String,
    /// Display-only reference (local path or data URL), never sent upstream.
    pub preview: String,
}

impl BaseImage {
    pub fn is_present(&self) -> bool {
        !self.data.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub base_image: BaseImage,
}

impl Character {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            description: String::new(),
            base_image: BaseImage::default(),
        }
    }

    pub fn has_image(&self) -> bool {
        self.base_image.is_present()
    }
}

impl Default for Character {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SceneOutcome {
    Loading,
    Success {
        #[serde(rename = "imageUrl")]
        image_url: String,
    },
    Error {
        error: String,
    },
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SceneStatus {
    Loading,
    Success,
    Error,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SceneResult {
    /// 1-based position of the scene in the story.
    pub id: usize,
    pub prompt: String,
    #[serde(flatten)]
    outcome: SceneOutcome,
}

impl SceneResult {
    pub fn loading(id: usize, prompt: impl Into<String>) -> Self {
        Self {
            id,
            prompt: prompt.into(),
            outcome: SceneOutcome::Loading,
        }
    }

    pub fn status(&self) -> SceneStatus {
        match self.outcome {
            SceneOutcome::Loading => SceneStatus::Loading,
            SceneOutcome::Success { .. } => SceneStatus::Success,
            SceneOutcome::Error { .. } => SceneStatus::Error,
        }
    }

    pub fn outcome(&self) -> &SceneOutcome {
        &self.outcome
    }

    pub fn image_url(&self) -> Option<&str> {
        match &self.outcome {
            SceneOutcome::Success { image_url } => Some(image_url),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            SceneOutcome::Error { error } => Some(error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status() != SceneStatus::Loading
    }

    /// Moves a loading scene to success. Returns false if the scene already left loading.
    pub fn succeed(&mut self, image_url: String) -> bool {
        self.resolve(SceneOutcome::Success { image_url })
    }

    /// Moves a loading scene to error. Returns false if the scene already left loading.
    pub fn fail(&mut self, error: String) -> bool {
        self.resolve(SceneOutcome::Error { error })
    }

    fn resolve(&mut self, outcome: SceneOutcome) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.outcome = outcome;
        true
    }
}

/// Snapshot of a generation run as seen by the presentation layer.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct Board {
    pub results: Vec<SceneResult>,
    pub generating: bool,
}
