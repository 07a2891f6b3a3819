//! # kvbridge Engine
//!
//! The native side of kvbridge: the callback-driven contract that storage
//! engines implement, an in-memory reference engine, and the event loop that
//! delivers engine events.
//!
//! ## Design Principles
//!
//! - Engines report results by firing events at [`Request`] objects
//! - Nothing fires from inside the call that started an operation
//! - Transactions commit automatically once they run out of work
//! - Everything is single-threaded (`Rc`, not `Arc`)
//!
//! ## Available Engines
//!
//! - [`MemoryFactory`] - In-memory engine for tests and ephemeral data
//!
//! ## Example
//!
//! ```rust
//! use kvbridge_engine::{Key, KeyRange};
//!
//! let range = KeyRange::bound(Key::from(1), Key::from(10), false, true).unwrap();
//! assert!(range.contains(&Key::from(1)));
//! assert!(!range.contains(&Key::from(10)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event_loop;
mod key;
mod memory;
mod native;
mod range;
mod request;

pub use error::{NativeError, NativeResult};
pub use event_loop::{EventLoop, Stalled};
pub use key::{Key, KeyPath};
pub use memory::{
    MemoryConfig, MemoryCursor, MemoryDatabase, MemoryFactory, MemoryIndex, MemoryStore,
    MemoryTransaction,
};
pub use native::{
    IndexParams, NativeCursor, NativeDatabase, NativeFactory, NativeIndex, NativeSource,
    NativeStore, NativeTransaction, StoreParams, TransactionMode,
};
pub use range::{CursorDirection, KeyRange};
pub use request::{
    EventSlot, Outcome, ReadyState, Request, TransactionEvents, UpgradeNeeded, VersionChange,
    WeakRequest,
};
pub use serde_json::Value;
