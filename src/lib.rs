//! Chat-thread persistence and orchestration over `SQLite`, Rig and axum,
//! in a strictly linted crate.

// Interdiction stricte de pratiques dangereuses ou non idiomatiques
#![deny(warnings)] // Tous les warnings sont traités comme des erreurs
#![deny(unsafe_code)] // Le code unsafe est interdit
#![deny(missing_docs)] // Tout élément public doit être documenté
#![deny(dead_code)] // Le code inutilisé est interdit
#![deny(unused_imports)] // Les imports inutilisés sont interdits
#![deny(unused_must_use)] // Oblige à gérer explicitement les Result et Option
#![deny(nonstandard_style)] // Empêche tout style de code non standard
#![forbid(unsafe_op_in_unsafe_fn)]

// Clippy pour stricte discipline
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)] // Interdit unwrap() hors tests
#![deny(clippy::expect_used)] // Interdit expect() hors tests
#![deny(clippy::panic)] // Interdit panic!()
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::redundant_clone)]

/// Thread registry, lifecycle coordination, checkpoint storage and the
/// conversation engine.
pub mod chat;
/// HTTP server and API routes.
#[allow(
    clippy::missing_errors_doc,
    clippy::missing_const_for_fn,
    clippy::unused_async
)]
pub mod server;
