//! Scriptable credential source.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use collab_core::{Credential, TokenProvider};

/// Token provider a test can change mid-session.
///
/// Clones share state, so a test keeps one handle and gives another to the
/// connection.
#[derive(Debug, Clone, Default)]
pub struct SimTokens {
    inner: Rc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    token: RefCell<Option<String>>,
    expired: Cell<bool>,
    fetches: Cell<usize>,
}

impl SimTokens {
    /// Provider returning `token`.
    pub fn new(token: &str) -> Self {
        let tokens = Self::default();
        tokens.set(Some(token));
        tokens
    }

    /// Replace the token. `None` signs the user out.
    pub fn set(&self, token: Option<&str>) {
        *self.inner.token.borrow_mut() = token.map(str::to_string);
        self.inner.expired.set(false);
    }

    /// Mark the current token expired.
    pub fn expire(&self) {
        self.inner.expired.set(true);
    }

    /// How many times a token was requested.
    pub fn fetches(&self) -> usize {
        self.inner.fetches.get()
    }
}

impl TokenProvider for SimTokens {
    fn token(&self) -> Option<Credential> {
        self.inner.fetches.set(self.inner.fetches.get() + 1);
        self.inner.token.borrow().as_deref().map(Credential::new)
    }

    fn is_expired(&self, _credential: &Credential) -> bool {
        self.inner.expired.get()
    }
}
