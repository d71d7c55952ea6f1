//! Context tags: which screen or workflow issued a call, and who was
//! signed in when it did.
//!
//! Both are produced outside this crate and treated as opaque. The
//! recorder asks for them once, synchronously, when a call is issued.

use std::panic::{catch_unwind, AssertUnwindSafe};

use parking_lot::RwLock;
use tracing::warn;

/// Tag used when the provider has nothing, returns an empty string, or panics.
pub const DEFAULT_CONTEXT: &str = "Unknown";

/// User recorded when nobody is signed in.
pub const DEFAULT_USER: &str = "Anonymous";

pub trait ContextProvider: Send + Sync + 'static {
    /// Must return quickly and must not block.
    fn current_context(&self) -> Option<String>;
}

impl<F> ContextProvider for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn current_context(&self) -> Option<String> {
        self()
    }
}

pub trait UserProvider: Send + Sync + 'static {
    /// Must return quickly and must not block.
    fn current_user(&self) -> Option<String>;
}

/// Ask the provider for a tag, falling back to [`DEFAULT_CONTEXT`].
pub fn context_or_default(provider: &dyn ContextProvider) -> String {
    tag_or(|| provider.current_context(), DEFAULT_CONTEXT, "context")
}

/// Ask the provider for the signed-in user, falling back to [`DEFAULT_USER`].
pub fn user_or_default(provider: &dyn UserProvider) -> String {
    tag_or(|| provider.current_user(), DEFAULT_USER, "user")
}

fn tag_or(read: impl FnOnce() -> Option<String>, default: &str, what: &'static str) -> String {
    match catch_unwind(AssertUnwindSafe(read)) {
        Ok(Some(tag)) if !tag.is_empty() => tag,
        Ok(_) => default.to_string(),
        Err(_) => {
            warn!(provider = what, "provider panicked; using default");
            default.to_string()
        }
    }
}

/// A tag that the application updates as the user navigates.
#[derive(Debug, Default)]
pub struct SharedContext {
    tag: RwLock<Option<String>>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, tag: impl Into<String>) {
        *self.tag.write() = Some(tag.into());
    }

    pub fn clear(&self) {
        *self.tag.write() = None;
    }

    pub fn get(&self) -> Option<String> {
        self.tag.read().clone()
    }
}

impl ContextProvider for SharedContext {
    fn current_context(&self) -> Option<String> {
        self.get()
    }
}

/// The signed-in user, updated on login and logout.
#[derive(Debug, Default)]
pub struct SharedUser {
    name: RwLock<Option<String>>,
}

impl SharedUser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign in. Prefers the email, then the display name, then the id;
    /// a user with none of them is recorded as [`DEFAULT_CONTEXT`].
    pub fn sign_in(&self, email: Option<&str>, name: Option<&str>, id: Option<&str>) {
        let chosen = [email, name, id]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or(DEFAULT_CONTEXT);
        *self.name.write() = Some(chosen.to_string());
    }

    pub fn sign_out(&self) {
        *self.name.write() = None;
    }

    pub fn get(&self) -> Option<String> {
        self.name.read().clone()
    }
}

impl UserProvider for SharedUser {
    fn current_user(&self) -> Option<String> {
        self.get()
    }
}

/// Always the same tag. Handy for background jobs and tests.
#[derive(Debug, Clone)]
pub struct StaticContext(pub String);

impl ContextProvider for StaticContext {
    fn current_context(&self) -> Option<String> {
        Some(self.0.clone())
    }
}
