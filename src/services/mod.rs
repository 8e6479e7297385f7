pub mod extractor;
pub mod llm;
pub mod locator;
pub mod narration;
pub mod reader;
