//! Chapterwise: chapter-by-chapter AI analysis of PDF books.

pub mod audio;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod session;
