pub mod claude;
pub mod llm;
pub mod openai;
