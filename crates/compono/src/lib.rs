//! Component-oriented JavaScript bundler
//!
//! The pipeline runs lexer → parser → analyzer (with its dependency graph) →
//! optimizer → bundle generator. [`compiler::Compiler`] drives it end to end and
//! [`watch::watch`] reruns it on file changes.

pub mod analyzer;
pub mod ast;
pub mod bundle_generator;
pub mod compiler;
pub mod config;
pub mod dependency_graph;
pub mod lexer;
pub mod messaging;
pub mod optimizer;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod types;
pub mod watch;

pub use compiler::{CompileResult, CompileStats, Compiler};
pub use config::Config;
