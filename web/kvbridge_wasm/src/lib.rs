//! # kvbridge WASM
//!
//! IndexedDB support for kvbridge in the browser.
//!
//! This crate provides:
//! - [`BrowserFactory`] and friends: the engine contract over `web-sys`
//!   IndexedDB, usable with [`kvbridge_core::Database`] from Rust
//! - A promise-returning `Database` class for JavaScript via wasm-bindgen
//!
//! ## Usage
//!
//! ```javascript
//! import init, { Database } from 'kvbridge_wasm';
//!
//! async function main() {
//!     await init();
//!
//!     const db = new Database("notes", [
//!         { version: 1, createStores: [{ name: "items", keyPath: "id" }] },
//!     ]);
//!
//!     await db.insert("items", [{ id: 1, text: "a" }, { id: 2, text: "b" }]);
//!     console.log(await db.count("items"));
//!
//!     await db.close();
//! }
//! ```
//!
//! ## From Rust
//!
//! Futures are driven by the browser's microtask queue through
//! `wasm-bindgen-futures`; there is no event loop to run.
//!
//! ```rust,ignore
//! let factory = Rc::new(BrowserFactory::from_global()?);
//! let db = kvbridge_core::Database::new(factory, config);
//! wasm_bindgen_futures::spawn_local(async move {
//!     let count = db.open_store("items", |items| items.count()).await;
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod convert;
mod database;
mod error;
mod schema;
mod utils;

pub use backend::*;
pub use database::*;
pub use error::{WasmError, WasmResult};
pub use schema::{config_from_steps, IndexSchema, StoreSchema, UpgradeStep};

use wasm_bindgen::prelude::*;

/// Initialize the WASM module.
///
/// This sets up panic hooks for better error messages in the browser console.
#[wasm_bindgen(start)]
pub fn init() {
    utils::set_panic_hook();
}
