//! Event handler ownership.
//!
//! IndexedDB holds handlers as JS functions; the Rust closures behind them
//! must outlive every event that may still fire. A [`Listeners`] set owns
//! the closures for one request or transaction. Each closure holds the set
//! alive, and the set is released once a terminal event has fired.

use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

type Listener = Closure<dyn FnMut(web_sys::Event)>;

#[derive(Default)]
pub(crate) struct Listeners {
    closures: RefCell<Vec<Listener>>,
}

impl Listeners {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Wraps `handler` and returns the JS function to install.
    pub(crate) fn attach(&self, handler: impl FnMut(web_sys::Event) + 'static) -> js_sys::Function {
        let closure = Closure::wrap(Box::new(handler) as Box<dyn FnMut(web_sys::Event)>);
        let function = closure.as_ref().unchecked_ref::<js_sys::Function>().clone();
        self.closures.borrow_mut().push(closure);
        function
    }

    /// Drops every closure once the current event has finished dispatching.
    ///
    /// Dropping a closure while it runs is an error in wasm-bindgen, so the
    /// drop is queued as a microtask.
    pub(crate) fn release(&self) {
        let closures = std::mem::take(&mut *self.closures.borrow_mut());
        if !closures.is_empty() {
            wasm_bindgen_futures::spawn_local(async move { drop(closures) });
        }
    }
}
