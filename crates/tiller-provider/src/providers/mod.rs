//! Concrete provider adapters.

pub mod openai_compat;

pub use openai_compat::{OpenAiCompatConfig, OpenAiCompatProvider};
