//! Agent memory: a markdown tree → chunked → embedded → hybrid search in
//! Postgres, kept consistent by an asynchronous file→index sync pipeline.

pub mod chunker;
pub mod config;
pub mod edit;
pub mod embeddings;
pub mod embeddings_cohere;
pub mod embeddings_huggingface;
pub mod embeddings_litellm;
pub mod embeddings_ollama;
pub mod embeddings_openai;
pub mod error;
pub mod files;
pub mod json_index;
pub mod mainfile;
pub mod manager;
pub mod schema;
pub mod search;
pub mod store;
pub mod store_postgres;
pub mod sync;
pub mod tools;

// Re-export run_migrations for consistency with the other entry points.
pub use schema::run_migrations;
