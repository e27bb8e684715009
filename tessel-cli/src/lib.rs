//! Tessel command-line front end: tokenizer adapter, prompt templating, and
//! terminal streaming.

pub mod chat_template;
pub mod stream;
pub mod tokenizer;
