pub mod jobs;
pub mod scenes;
pub mod segments;
