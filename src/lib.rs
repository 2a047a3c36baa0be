pub mod ast;
pub mod config;
pub mod event;
pub mod harness;
pub mod interpreter;
pub mod parser;
pub mod reducer;
pub mod replay;
pub mod runtime;
pub mod samples;
pub mod stepper;
pub mod tokenizer;
