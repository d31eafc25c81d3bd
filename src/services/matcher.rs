use crate::core::state::Character;

/// Characters whose name appears in the prompt, case-insensitively, in collection order.
///
/// Plain substring search: "El" matches "Elara". Unnamed characters never match.
pub fn relevant_characters<'a>(prompt: &str, characters: &'a [Character]) -> Vec<&'a Character> {
    let prompt = prompt.to_lowercase();
    characters
        .iter()
        .filter(|c| !c.name.is_empty() && prompt.contains(&c.name.to_lowercase()))
        .collect()
}

/// A scene can only be generated when at least one matched character carries a portrait.
pub fn has_reference_image(matched: &[&Character]) -> bool {
    matched.iter().any(|c| c.has_image())
}
