#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use,
    clippy::cast_possible_wrap
)]

pub mod chat;
pub mod config;
pub mod editor;
pub mod error;
pub mod model;
pub mod store;

pub use config::ProformaConfig;
pub use editor::{Caller, SessionEnd, TemplateEditor};
pub use error::ProformaError;
