//! The principal on whose behalf a command is executed.

use std::borrow::Cow;
use std::fmt;


//------------ Actor ---------------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Actor {
    name: Cow<'static, str>,
    is_user: bool,
}

impl Actor {
    /// Creates an actor for the system itself or one of its components.
    pub const fn system(name: &'static str) -> Actor {
        Actor { name: Cow::Borrowed(name), is_user: false }
    }

    /// Creates an actor for an authenticated user.
    pub fn user(name: impl Into<String>) -> Actor {
        Actor { name: Cow::Owned(name.into()), is_user: true }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_user(&self) -> bool {
        self.is_user
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)
    }
}
