//! # Audio Module
//!
//! Motor de sesiones de reproducción: una sesión por guild con su cola,
//! su reloj y su configuración de filtros, gobernada por un único
//! controlador de transiciones.
//!
//! ## Arquitectura
//!
//! ### [`controller`] - Transition Controller
//! - Máquina de estados `Idle → Loading → Playing ⇄ Paused → Restarting`
//! - Único escritor del estado de las sesiones
//! - Descarta las señales de fin de pipelines ya reemplazados
//!
//! ### [`session`] / [`registry`]
//! - Estado por guild detrás de un lock exclusivo
//! - Registro perezoso, una sesión por guild
//!
//! ### [`queue`] / [`clock`]
//! - Cola FIFO acotada con historial
//! - Tiempo transcurrido a través de pausas y reinicios en caliente
//!
//! ### [`pipeline`] / [`voice`]
//! - ffmpeg + Songbird para decodificar y emitir
//! - Conexión a canales de voz
//!
//! ## Audio
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Bit Depth**: 16-bit signed integers
//! - **Channels**: Stereo (2 channels)

pub mod clock;
pub mod controller;
pub mod filters;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod session;
pub mod track;
pub mod voice;
