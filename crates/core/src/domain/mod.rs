pub mod dialogue;
pub mod record;
