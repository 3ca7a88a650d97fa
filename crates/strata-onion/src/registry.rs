//! Magic-keyed recognition of inbound layers.
//!
//! Built once at engine start with [`Registry::standard`]. Registering the
//! same magic twice is a startup error.

use std::collections::HashMap;

use strata_types::{magic_str, Magic, Splice};
use tracing::trace;

use crate::layers::LayerKind;
use crate::{OnionError, Result};

#[derive(Clone, Debug, Default)]
pub struct Registry {
    kinds: HashMap<Magic, LayerKind>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: LayerKind) -> Result<()> {
        let magic = kind.magic();
        if self.kinds.contains_key(&magic) {
            return Err(OnionError::DuplicateMagic(magic_str(&magic)));
        }
        self.kinds.insert(magic, kind);
        Ok(())
    }

    /// A registry holding every wire layer kind.
    pub fn standard() -> Result<Self> {
        let mut registry = Self::new();
        for kind in LayerKind::WIRE {
            registry.register(kind)?;
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// The kind of the layer at the cursor. The cursor does not move.
    ///
    /// Unknown or truncated magics return `None` so callers can drop foreign
    /// traffic without treating it as an error.
    pub fn recognise(&self, s: &Splice) -> Option<LayerKind> {
        let magic = s.peek_magic()?;
        let kind = self.kinds.get(&magic).copied();
        if kind.is_none() {
            trace!(magic = %magic_str(&magic), "unrecognised magic");
        }
        kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_has_every_wire_kind() {
        let registry = Registry::standard().expect("registry");
        assert_eq!(registry.len(), LayerKind::WIRE.len());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = Registry::new();
        registry.register(LayerKind::Crypt).expect("first");
        match registry.register(LayerKind::Crypt) {
            Err(OnionError::DuplicateMagic(m)) => assert_eq!(m, "crpt"),
            other => assert!(other.is_err(), "expected DuplicateMagic, got {other:?}"),
        }
    }

    #[test]
    fn test_recognise_does_not_consume() {
        let registry = Registry::standard().expect("registry");
        let mut s = Splice::load(b"exit and more".to_vec());
        assert_eq!(registry.recognise(&s), Some(LayerKind::Exit));
        assert_eq!(s.cursor(), 0);

        s.set_cursor(5);
        assert_eq!(registry.recognise(&s), None);
    }

    #[test]
    fn test_recognise_unknown_and_short() {
        let registry = Registry::standard().expect("registry");
        assert_eq!(registry.recognise(&Splice::load(b"zzzz".to_vec())), None);
        assert_eq!(registry.recognise(&Splice::load(b"cr".to_vec())), None);
        assert_eq!(registry.recognise(&Splice::default()), None);
    }
}
