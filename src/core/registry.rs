//! Opcode-to-factory registry.
//!
//! Maps each 1-byte opcode to the factory that produces a blank packet for
//! decoding. Registration is first-writer-wins: a second registration for
//! the same opcode is logged and ignored, never overwritten. This is
//! deliberate idempotency so that module init order cannot silently swap a
//! packet type out from under an established wire contract.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::core::packet::{Framing, Packet};

type PacketFactory = dyn Fn() -> Box<dyn Packet> + Send + Sync + 'static;

/// A registered opcode: its framing plus the factory for blank instances.
#[derive(Clone)]
pub struct PacketDescriptor {
    pub opcode: u8,
    pub framing: Framing,
    factory: Arc<PacketFactory>,
}

impl PacketDescriptor {
    /// Produce a blank packet ready for [`Packet::read_body`].
    pub fn instantiate(&self) -> Box<dyn Packet> {
        (self.factory)()
    }
}

/// Thread-safe opcode registry. Entries are immutable once written.
pub struct PacketRegistry {
    descriptors: Arc<RwLock<HashMap<u8, PacketDescriptor>>>,
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketRegistry {
    pub fn new() -> Self {
        Self {
            descriptors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a packet type under its own opcode.
    ///
    /// Returns `true` if this call created the registration, `false` if the
    /// opcode was already taken (the earlier registration is kept).
    pub fn register<T>(&self) -> bool
    where
        T: Packet + Default,
    {
        let probe = T::default();
        let opcode = probe.opcode();
        let framing = probe.framing();
        let name = probe.name();

        let mut descriptors = match self.descriptors.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(existing) = descriptors.get(&opcode) {
            warn!(
                opcode = %format_args!("0x{opcode:02X}"),
                kept = ?existing.framing,
                ignored = name,
                "Duplicate opcode registration ignored"
            );
            return false;
        }

        descriptors.insert(
            opcode,
            PacketDescriptor {
                opcode,
                framing,
                factory: Arc::new(|| Box::new(T::default())),
            },
        );
        debug!(opcode = %format_args!("0x{opcode:02X}"), packet = name, "Opcode registered");
        true
    }

    /// Look up the descriptor for an opcode.
    pub fn lookup(&self, opcode: u8) -> Option<PacketDescriptor> {
        let descriptors = match self.descriptors.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        descriptors.get(&opcode).cloned()
    }

    /// Number of registered opcodes.
    pub fn len(&self) -> usize {
        match self.descriptors.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::wire::{PacketReader, PacketWriter};
    use crate::error::Result;
    use std::any::Any;

    #[derive(Default)]
    struct First;

    impl Packet for First {
        fn opcode(&self) -> u8 {
            0x42
        }
        fn name(&self) -> &'static str {
            "First"
        }
        fn framing(&self) -> Framing {
            Framing::Fixed(1)
        }
        fn write_body(&self, _w: &mut PacketWriter) -> Result<()> {
            Ok(())
        }
        fn read_body(&mut self, _r: &mut PacketReader<'_>) -> Result<()> {
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Default)]
    struct Second;

    impl Packet for Second {
        fn opcode(&self) -> u8 {
            0x42
        }
        fn name(&self) -> &'static str {
            "Second"
        }
        fn write_body(&self, _w: &mut PacketWriter) -> Result<()> {
            Ok(())
        }
        fn read_body(&mut self, _r: &mut PacketReader<'_>) -> Result<()> {
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn first_registration_wins() {
        let registry = PacketRegistry::new();
        assert!(registry.register::<First>());
        assert!(!registry.register::<Second>());

        let descriptor = registry.lookup(0x42).expect("registered opcode");
        assert_eq!(descriptor.framing, Framing::Fixed(1));
        assert_eq!(descriptor.instantiate().name(), "First");
    }

    #[test]
    fn lookup_miss_is_none() {
        let registry = PacketRegistry::new();
        assert!(registry.lookup(0x99).is_none());
    }
}
