/// Splits a story into scene prompts: one per non-blank line, trimmed, in order.
pub fn split_scenes(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
