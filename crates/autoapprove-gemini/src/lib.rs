//! Gemini language model client for autoapprove
//!
//! [`GeminiModel`] implements [`autoapprove_core::LanguageModel`] over the
//! `generateContent` REST endpoint. Transient failures (timeouts, 408, 429,
//! 5xx) are retried with the shared backoff policy; everything else surfaces
//! as a typed [`autoapprove_core::ModelError`].

pub mod client;
pub mod wire;

pub use client::{GeminiConfig, GeminiModel};
