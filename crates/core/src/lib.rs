mod assets;
mod provider;
#[cfg(test)]
mod test_utils;

pub mod assistant;
pub mod completion;
pub mod config;
pub mod error;
pub mod mode;
pub mod session;

pub use crate::assets::get_data_dir;
pub use crate::provider::llm::{get_assistant_backend, get_chat_backend};
