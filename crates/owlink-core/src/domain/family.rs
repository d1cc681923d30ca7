//! Family code → device container registry.
//!
//! Byte 0 of every ROM id names the device *family* (0x28 is a DS18B20
//! thermometer, 0x01 a DS1990A serial number button, and so on).  Callers
//! that want a typed handle for a discovered address ask the registry, which
//! looks the family up in an explicit table of constructor functions and falls
//! back to a generic container for unknown families.
//!
//! Device command sets are not modelled here; a container only knows its
//! address and how to describe itself.

use std::collections::HashMap;
use std::fmt;

use crate::domain::address::RomId;

/// A typed handle for one device on the bus.
pub trait DeviceContainer: fmt::Debug + Send {
    /// The device address.
    fn address(&self) -> RomId;
    /// Short part name, e.g. `"DS18B20"`.
    fn name(&self) -> &str;
    /// One-line human readable description.
    fn description(&self) -> &str;
}

/// Constructor stored in the registry.
pub type ContainerFactory = fn(RomId) -> Box<dyn DeviceContainer>;

/// A container that carries a fixed name and description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedContainer {
    address: RomId,
    name: &'static str,
    description: &'static str,
}

impl NamedContainer {
    /// Creates a container with a static name and description.
    pub fn new(address: RomId, name: &'static str, description: &'static str) -> Self {
        Self {
            address,
            name,
            description,
        }
    }
}

impl DeviceContainer for NamedContainer {
    fn address(&self) -> RomId {
        self.address
    }

    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }
}

fn generic_container(address: RomId) -> Box<dyn DeviceContainer> {
    Box::new(NamedContainer::new(
        address,
        "Unknown",
        "1-Wire device with no registered family container",
    ))
}

/// Builds a factory function for a family with a static name/description.
macro_rules! named_factory {
    ($name:expr, $description:expr) => {{
        fn factory(address: RomId) -> Box<dyn DeviceContainer> {
            Box::new(NamedContainer::new(address, $name, $description))
        }
        factory as ContainerFactory
    }};
}

/// Explicit family → constructor table with a default fallback entry.
pub struct FamilyRegistry {
    factories: HashMap<u8, ContainerFactory>,
    fallback: ContainerFactory,
}

impl FamilyRegistry {
    /// Creates an empty registry whose every lookup yields the generic container.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            fallback: generic_container,
        }
    }

    /// Registers (or replaces) the constructor for `family`.
    pub fn register(&mut self, family: u8, factory: ContainerFactory) {
        self.factories.insert(family, factory);
    }

    /// Replaces the fallback constructor used for unregistered families.
    pub fn set_fallback(&mut self, factory: ContainerFactory) {
        self.fallback = factory;
    }

    /// Returns `true` if `family` has a dedicated constructor.
    pub fn is_registered(&self, family: u8) -> bool {
        self.factories.contains_key(&family)
    }

    /// Builds the container for `address`.
    pub fn create(&self, address: RomId) -> Box<dyn DeviceContainer> {
        let factory = self
            .factories
            .get(&address.family())
            .copied()
            .unwrap_or(self.fallback);
        factory(address)
    }
}

impl Default for FamilyRegistry {
    /// A registry pre-populated with a few common families.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(0x01, named_factory!("DS1990A", "Serial number iButton"));
        registry.register(0x10, named_factory!("DS1920", "Temperature iButton with trips"));
        registry.register(0x12, named_factory!("DS2406", "Dual addressable switch with memory"));
        registry.register(0x1D, named_factory!("DS2423", "4 kbit RAM with counters"));
        registry.register(0x20, named_factory!("DS2450", "Quad A/D converter"));
        registry.register(0x26, named_factory!("DS2438", "Smart battery monitor"));
        registry.register(0x28, named_factory!("DS18B20", "Programmable resolution thermometer"));
        registry.register(0x29, named_factory!("DS2408", "8-channel addressable switch"));
        registry.register(0x2D, named_factory!("DS2431", "1 kbit protected EEPROM"));
        registry.register(0x3A, named_factory!("DS2413", "Dual channel addressable switch"));
        registry
    }
}

impl fmt::Debug for FamilyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut families: Vec<_> = self.factories.keys().copied().collect();
        families.sort_unstable();
        f.debug_struct("FamilyRegistry")
            .field("families", &families)
            .finish_non_exhaustive()
    }
}
