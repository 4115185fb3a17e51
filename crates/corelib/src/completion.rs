//! Single-shot completion tokens handed to every verb handler.
//!
//! A handler receives a [`Completion<T>`] and must eventually report a
//! status plus a value through it. Invocation consumes the token, so it can
//! fire at most once. A token that is dropped without being invoked fires
//! itself with [`Status::Error`] and `T::default()`, so the requester is
//! never left waiting even when a handler parks the token and later loses
//! it.
//!
//! Handlers in this crate complete synchronously, before returning, except
//! for waited lookups which park their token until a later publish.

use std::fmt;

use crate::status::Status;

type Callback<T> = Box<dyn FnOnce(Status, T)>;

pub struct Completion<T: Default> {
    verb: &'static str,
    callback: Option<Callback<T>>,
}

impl<T: Default> Completion<T> {
    /// Wrap `callback`; `verb` names the operation for diagnostics.
    pub fn new<F>(verb: &'static str, callback: F) -> Self
    where
        F: FnOnce(Status, T) + 'static,
    {
        Self {
            verb,
            callback: Some(Box::new(callback)),
        }
    }

    /// A completion nobody listens to.
    pub fn detached(verb: &'static str) -> Self {
        Self {
            verb,
            callback: None,
        }
    }

    pub fn complete(mut self, status: Status, value: T) {
        if let Some(callback) = self.callback.take() {
            callback(status, value);
        }
    }

    pub fn succeed(self, value: T) {
        self.complete(Status::Success, value);
    }

    pub fn fail(self, status: Status) {
        self.complete(status, T::default());
    }
}

impl<T: Default> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            tracing::error!(verb = self.verb, "completion dropped without being invoked");
            callback(Status::Error, T::default());
        }
    }
}

impl<T: Default> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("verb", &self.verb)
            .field("pending", &self.callback.is_some())
            .finish()
    }
}
