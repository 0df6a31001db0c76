//! Presentación de respuestas de Discord

pub mod embeds;
