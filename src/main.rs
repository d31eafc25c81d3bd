use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use storyboard::core::config::Config;
use storyboard::core::io::{NativeStorage, Storage};
use storyboard::core::state::{Board, SceneResult, SceneStatus};
use storyboard::services::generator::create_generator;
use storyboard::services::image::{decode_data_url, extension_for_mime};
use storyboard::services::script::split_scenes;
use storyboard::services::setup;
use storyboard::services::workflow::Storyboard;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yml".to_string());

    // 1. Load config
    let mut config = match Config::load_from(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure '{}' exists with characters and a story.", config_path);
            return Err(e);
        }
    };
    config.ensure_directories()?;

    // 2. Interactive setup (API key, model)
    setup::run_setup(&mut config)?;

    // 3. Build characters and story
    let storage = NativeStorage::new();
    let generator = create_generator(&config)?;
    let storyboard = Storyboard::from_config(&config, &storage, generator).await?;

    let scene_count = split_scenes(storyboard.story()).len();
    if scene_count == 0 {
        println!("The story has no scenes. Nothing to generate.");
        return Ok(());
    }
    if !setup::confirm_generation(&config, scene_count)? {
        println!("Stopping as requested.");
        return Ok(());
    }

    // 4. Generate, rendering progress as scenes resolve
    let pb = ProgressBar::new(scene_count as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let (results, ()) = tokio::join!(
        storyboard.generate(),
        render_progress(storyboard.subscribe(), pb)
    );
    let results = results?;

    // 5. Write images
    let mut written = 0;
    for result in &results {
        if let Some(image_url) = result.image_url() {
            match write_scene_image(&storage, &config.output_folder, result.id, image_url).await {
                Ok(path) => {
                    println!("Scene {} saved to {}", result.id, path);
                    written += 1;
                }
                Err(e) => eprintln!("Scene {} could not be saved: {:#}", result.id, e),
            }
        }
    }

    let failed = results
        .iter()
        .filter(|r| r.status() == SceneStatus::Error)
        .count();
    println!(
        "Storyboard complete: {} image(s) written, {} scene(s) failed.",
        written, failed
    );
    Ok(())
}

async fn render_progress(mut rx: watch::Receiver<Board>, pb: ProgressBar) {
    let mut reported = 0;
    loop {
        {
            let board = rx.borrow_and_update();
            let newly_done: Vec<&SceneResult> = board
                .results
                .iter()
                .skip(reported)
                .take_while(|r| r.is_terminal())
                .collect();
            for result in newly_done {
                match result.error() {
                    Some(err) => pb.println(format!("[error] Scene {}: {}", result.id, err)),
                    None => pb.println(format!("[ok] Scene {}: {}", result.id, result.prompt)),
                }
                pb.inc(1);
                reported += 1;
            }
            if !board.results.is_empty() && reported == board.results.len() {
                break;
            }
            if let Some(next) = board.results.get(reported) {
                pb.set_message(format!("Generating scene {}", next.id));
            }
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
    pb.finish_with_message("done");
}

async fn write_scene_image(
    storage: &dyn Storage,
    output_folder: &str,
    id: usize,
    image_url: &str,
) -> Result<String> {
    let (mime_type, bytes) = decode_data_url(image_url)?;
    let path = Path::new(output_folder).join(format!(
        "scene_{:03}.{}",
        id,
        extension_for_mime(&mime_type)
    ));
    let path_str = path.to_string_lossy().to_string();
    storage.write(&path_str, &bytes).await?;
    Ok(path_str)
}
