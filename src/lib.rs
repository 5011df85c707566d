//! # Luật Thuế
//!
//! A question-answering assistant over a folder of Vietnamese tax-law PDFs,
//! backed by Gemini.
//!
//! On first use the local PDFs are made available remotely: documents the
//! provider already holds are reused, the rest are uploaded and polled until
//! processing finishes. A file that fails is skipped without stopping the
//! others. The resulting knowledge base is memoized for the whole process and
//! seeds every chat session.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌────────────────┐
//! │ tailieu/   │──▶│ Synchronizer │──▶│ KnowledgeCache │
//! │  *.pdf     │   │ upload/poll  │   │  (memoized)    │
//! └────────────┘   └──────┬───────┘   └───────┬────────┘
//!                         │ DocumentStore      │ KnowledgeBase
//!                         ▼                    ▼
//!                  ┌─────────────┐      ┌─────────────┐
//!                  │   Gemini    │◀─────│ ChatSession │
//!                  │  Files+Chat │      └──────┬──────┘
//!                  └─────────────┘             │
//!                                   ┌──────────┴──────────┐
//!                                   ▼                     ▼
//!                              ┌──────────┐         ┌──────────┐
//!                              │   CLI    │         │   HTTP   │
//!                              │  (chat)  │         │ (serve)  │
//!                              └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GOOGLE_API_KEY=...
//! luatthue docs                  # list local PDFs
//! luatthue sync                  # upload or reuse them
//! luatthue chat --stream         # ask questions
//! luatthue serve                 # HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Provider, sync and chat error enums |
//! | [`models`] | Core data types |
//! | [`documents`] | Local PDF discovery |
//! | [`traits`] | `DocumentStore` / `ChatModel` seams |
//! | [`gemini`] | Gemini REST client |
//! | [`memory`] | In-process store and model for tests and offline runs |
//! | [`retry`] | Bounded polling with backoff |
//! | [`sync`] | Document synchronizer |
//! | [`progress`] | Sync progress reporting |
//! | [`knowledge`] | Process-wide knowledge-base cache |
//! | [`session`] | Chat sessions and the session registry |
//! | [`credentials`] | API key resolution |
//! | [`chat`] | Terminal chat loop |
//! | [`server`] | HTTP server |

pub mod chat;
pub mod config;
pub mod credentials;
pub mod documents;
pub mod error;
pub mod gemini;
pub mod knowledge;
pub mod memory;
pub mod models;
pub mod progress;
pub mod retry;
pub mod server;
pub mod session;
pub mod sync;
pub mod traits;
