#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate
)]

pub mod app;
pub mod channels;
pub mod cli;
pub mod config;
pub mod doctor;
pub mod downloader;
pub mod error;
pub mod fileserver;
pub mod gate;
pub mod links;
pub mod media;
pub mod relay;
pub mod storage;

pub use config::Config;
pub use error::{ErrorCode, RelayError, Result};
