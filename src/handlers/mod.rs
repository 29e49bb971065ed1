pub mod appointments;
pub mod auth;
pub mod collections;
pub mod image_tags;
pub mod patients;
pub mod progress_notes;
