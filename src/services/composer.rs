use crate::core::state::Character;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPart {
    InlineImage { mime_type: String, data: String },
    Text(String),
}

/// Multimodal request for one scene: reference images first, then a single text part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneRequest {
    pub parts: Vec<RequestPart>,
}

impl SceneRequest {
    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, RequestPart::InlineImage { .. }))
            .count()
    }

    pub fn text(&self) -> Option<&str> {
        self.parts.iter().find_map(|p| match p {
            RequestPart::Text(text) => Some(text.as_str()),
            _ => None,
        })
    }
}

pub fn compose_request(prompt: &str, matched: &[&Character]) -> SceneRequest {
    let mut parts: Vec<RequestPart> = matched
        .iter()
        .filter(|c| c.has_image() && !c.base_image.mime_type.is_empty())
        .map(|c| RequestPart::InlineImage {
            mime_type: c.base_image.mime_type.clone(),
            data: c.base_image.data.clone(),
        })
        .collect();

    parts.push(RequestPart::Text(compose_text(prompt, matched)));
    SceneRequest { parts }
}

pub fn compose_text(prompt: &str, matched: &[&Character]) -> String {
    let descriptions: Vec<&str> = matched
        .iter()
        .map(|c| {
            let d = c.description.trim();
            d.strip_suffix('.').unwrap_or(d).trim_end()
        })
        .filter(|d| !d.is_empty())
        .collect();

    if descriptions.is_empty() {
        format!("Scene: {}", prompt)
    } else {
        format!("{}. Scene: {}", descriptions.join(". "), prompt)
    }
}
