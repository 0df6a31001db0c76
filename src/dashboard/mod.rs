//! # Dashboard Module
//!
//! Transporte de observadores del panel web: snapshots coalescidos por guild
//! y órdenes remotas que pasan por el mismo controlador que los comandos de
//! Discord.
//!
//! - [`snapshot`]: proyección serializable de una sesión
//! - [`publisher`]: difusión con coalescencia ([`publisher::BroadcastHub`])
//! - [`control`]: acciones remotas y sus alias antiguos
//! - [`service`]: suscripciones, órdenes y bucle de sincronización

pub mod control;
pub mod publisher;
pub mod service;
pub mod snapshot;

pub use publisher::{BroadcastHub, NoopPublisher, Publisher};
pub use service::DashboardService;
