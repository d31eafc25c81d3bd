pub mod characters;
pub mod composer;
pub mod generator;
pub mod image;
pub mod matcher;
pub mod script;
pub mod setup;
pub mod workflow;
