use crate::core::config::Config;
use crate::services::generator::GEMINI_IMAGE_MODELS;
use anyhow::{anyhow, Result};
use inquire::{Password, PasswordDisplayMode, Select};

/// Fills in generator settings the config file is missing, asking the user when allowed.
pub fn run_setup(config: &mut Config) -> Result<()> {
    let mut needs_save = false;
    let provider = config.generator.provider.clone();

    match provider.as_str() {
        "gemini" => {
            let unattended = config.unattended;
            let cfg = config.generator.gemini.get_or_insert_with(Default::default);

            if cfg.resolve_api_key().is_none() {
                if unattended {
                    return Err(anyhow!(
                        "Gemini API key missing. Set generator.gemini.api_key or GEMINI_API_KEY"
                    ));
                }
                let key = Password::new("Gemini API key:")
                    .with_display_mode(PasswordDisplayMode::Masked)
                    .without_confirmation()
                    .prompt()?;
                cfg.api_key = Some(key);
                needs_save = true;
            }

            if !unattended && !GEMINI_IMAGE_MODELS.contains(&cfg.model.as_str()) {
                let keep = format!("Keep \"{}\"", cfg.model);
                let mut options: Vec<String> =
                    GEMINI_IMAGE_MODELS.iter().map(|m| m.to_string()).collect();
                options.push(keep.clone());

                let choice =
                    Select::new("Unrecognized image model. Select a model:", options).prompt()?;
                if choice != keep {
                    cfg.model = choice;
                    needs_save = true;
                }
            }
        }
        _ => return Err(anyhow!("Unknown image provider: {}", provider)),
    }

    if needs_save {
        config.save()?;
        println!("Configuration saved.");
    }

    Ok(())
}

/// Asks before spending API calls. Always true when unattended.
pub fn confirm_generation(config: &Config, scene_count: usize) -> Result<bool> {
    if config.unattended {
        return Ok(true);
    }
    let ans = inquire::Confirm::new(&format!("Generate {} scene image(s)?", scene_count))
        .with_default(true)
        .prompt()?;
    Ok(ans)
}
