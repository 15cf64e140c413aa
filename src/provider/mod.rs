pub mod echo;
pub mod openai;
pub mod sse;
mod types;

pub use openai::OpenAiProvider;
pub use types::*;
