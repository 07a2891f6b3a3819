//! Engine implementations backed by browser storage.

mod indexeddb;
mod listeners;

pub use indexeddb::{
    BrowserCursor, BrowserDatabase, BrowserFactory, BrowserIndex, BrowserStore, BrowserTransaction,
};
