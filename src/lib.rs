//! # doc-chat
//!
//! Retrieval-augmented chat over a single document.
//!
//! At startup the configured PDF is converted to text, chunked and embedded
//! into an in-memory vector index. Each chat request retrieves the passages
//! closest to the question, appends them to the conversation as context and
//! streams the language model's answer back as Server-Sent Events.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────────┐
//! │ Document │──▶│  Chunk   │──▶│ VectorIndex │
//! │  (PDF)   │   │ + Embed  │   │  (memory)   │
//! └──────────┘   └──────────┘   └──────┬──────┘
//!                                      │ top-k
//!  POST /chat/ ──▶ SessionStore ──▶ augmented turn ──▶ ChatModel
//!                                                        │
//!               SSE  ◀── stream responder ◀──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credentials |
//! | [`document`] | PDF / text loading |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Retrieval index |
//! | [`llm`] | Streaming chat completion client |
//! | [`models`] | Core data types |
//! | [`session`] | Conversation store |
//! | [`stream`] | SSE streaming responder |
//! | [`server`] | HTTP server |

pub mod chunk;
pub mod config;
pub mod document;
pub mod embedding;
pub mod index;
pub mod llm;
pub mod models;
pub mod server;
pub mod session;
pub mod stream;
