//! # docvault
//!
//! A document ingestion backend: upload text, PDF and DOCX files, extract
//! their text, split it into token-bounded overlapping chunks, embed every
//! chunk, and keep the results in SQLite behind an authenticated HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌────────┐   ┌──────────┐   ┌──────────┐
//! │ extract  │──▶│  chunk  │──▶│ tokens │──▶│embedding │──▶│  store   │
//! │txt/pdf/  │   │recursive│   │cl100k  │   │live/mock │   │ SQLite   │
//! │docx      │   │splitter │   │        │   │          │   │          │
//! └──────────┘   └─────────┘   └────────┘   └──────────┘   └────┬─────┘
//!        ▲                  ingest::Pipeline                    │
//!        └──────────────────────────────────────────────────────┤
//!                                            ┌──────────────────┤
//!                                            ▼                  ▼
//!                                       ┌──────────┐      ┌──────────┐
//!                                       │   CLI    │      │   HTTP   │
//!                                       │(docvault)│      │  (axum)  │
//!                                       └──────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docvault init                                  # create database
//! docvault create-admin --email a@b.c --password x
//! docvault ingest ./handbook.pdf                 # ingest one local file
//! docvault files                                 # list documents
//! docvault serve                                 # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed errors per pipeline stage |
//! | [`extract`] | Text extraction (txt, pdf, docx) |
//! | [`tokens`] | `cl100k_base` token counting |
//! | [`chunk`] | Recursive token-bounded chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`ingest`] | Pipeline orchestration and status machine |
//! | [`store`] | SQLite reads and writes |
//! | [`auth`] | Password hashing and bearer tokens |
//! | [`server`] | HTTP API |
//! | [`files`] | `docvault files` inventory |
//! | [`accounts`] | `docvault create-admin` |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod accounts;
pub mod auth;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod files;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod server;
pub mod store;
pub mod tokens;
