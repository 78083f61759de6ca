pub mod llm_protocol;
pub mod openai;
pub mod output;
pub mod sandbox;
pub mod session;
pub mod table;
pub mod tool;
