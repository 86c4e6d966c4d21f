//! Process-wide type-token registry (§4.1, §9 "Global/singleton state").
//!
//! The registry maps a [`TypeToken`] to metadata about the type it
//! identifies. It is deliberately *not* a `static` that code reaches for
//! implicitly everywhere: a [`TypeRegistry`] is an explicit value, and
//! [`TypeRegistry::global`] is the one process-wide instance the CLI/
//! executor use by default. Tests construct their own fresh registry rather
//! than mutating the shared one, per §9's "tests inject a fresh holder".

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;

use crate::error::TsqError;
use crate::value::TypeToken;

/// Metadata for one registered value type. Decoder/iterator-factory/pool
/// hooks are represented as a name plus a capability summary rather than
/// function pointers, since this core does not implement wire codecs for
/// arbitrary plugin-defined types (only the four built-ins, in
/// [`crate::codec`]) — a real deployment would extend this with trait
/// objects for the decode/iterator-factory hooks named in §4.1.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub token: TypeToken,
    pub name: &'static str,
    pub supports_interpolation: bool,
}

#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<TypeToken, TypeDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-seeded with the four built-in types, matching what
    /// [`global`](Self::global) carries.
    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register(TypeDescriptor {
            token: TypeToken::NUMERIC,
            name: "Numeric",
            supports_interpolation: true,
        });
        r.register(TypeDescriptor {
            token: TypeToken::NUMERIC_SUMMARY,
            name: "NumericSummary",
            supports_interpolation: true,
        });
        r.register(TypeDescriptor {
            token: TypeToken::NUMERIC_ARRAY,
            name: "NumericArray",
            supports_interpolation: true,
        });
        r.register(TypeDescriptor {
            token: TypeToken::EVENT,
            name: "Event",
            supports_interpolation: false,
        });
        r.register(TypeDescriptor {
            token: TypeToken::ANNOTATION,
            name: "Annotation",
            supports_interpolation: false,
        });
        r
    }

    /// Register (or overwrite) a type. Adding a new type requires only this
    /// call; no core code changes (§4.1).
    pub fn register(&mut self, descriptor: TypeDescriptor) {
        self.types.insert(descriptor.token, descriptor);
    }

    pub fn get(&self, token: TypeToken) -> Option<&TypeDescriptor> {
        self.types.get(&token)
    }

    pub fn require(&self, token: TypeToken) -> Result<&TypeDescriptor, TsqError> {
        self.get(token)
            .ok_or_else(|| TsqError::UnknownType(format!("{token:?}")))
    }
}

static GLOBAL: Lazy<RwLock<TypeRegistry>> = Lazy::new(|| RwLock::new(TypeRegistry::with_builtins()));

impl TypeRegistry {
    /// Handle to the process-wide registry. Initialized before the executor
    /// starts serving queries and not torn down explicitly (§5 lifecycle) —
    /// process exit reclaims it.
    pub fn global() -> &'static RwLock<TypeRegistry> {
        &GLOBAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_registry_has_builtins() {
        let reg = TypeRegistry::with_builtins();
        assert!(reg.get(TypeToken::NUMERIC).is_some());
        assert!(reg.get(TypeToken(999)).is_none());
    }

    #[test]
    fn new_type_registers_without_core_changes() {
        let mut reg = TypeRegistry::new();
        reg.register(TypeDescriptor {
            token: TypeToken(100),
            name: "Custom",
            supports_interpolation: false,
        });
        assert_eq!(reg.require(TypeToken(100)).unwrap().name, "Custom");
    }
}
