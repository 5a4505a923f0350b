#![forbid(unsafe_code)]

pub mod article;
pub mod cli;
pub mod config;
pub mod download;
pub mod formats;
pub mod logging;
pub mod progress_bar;
pub mod progress_store;
pub mod report;
pub mod sanitize;
pub mod source;
pub mod summary;
pub mod traverse;
