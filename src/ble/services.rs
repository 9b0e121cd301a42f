//! GATT service discovery.
//!
//! The [`Resolver`] walks services, then characteristics, then descriptors of
//! a connected peripheral and returns a read-only [`ServiceTree`]. Subscriber
//! and writer reference entries of that tree by UUID or handle.

use std::fmt;

use btleplug::api::CharPropFlags;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ble::connection::Connection;
use crate::ble::stack::BleStack;
use crate::ble::uuids::{self, CCCD_UUID};
use crate::error::{Error, Result};

/// A primary service and its attribute handle range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Service UUID.
    pub uuid: Uuid,
    /// First handle of the service.
    pub start_handle: u16,
    /// Last handle of the service.
    pub end_handle: u16,
}

/// A characteristic, addressed by its value handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Value handle.
    pub handle: u16,
    /// Characteristic properties.
    pub properties: CharPropFlags,
}

impl CharacteristicDescriptor {
    /// Check if the characteristic can notify.
    pub fn can_notify(&self) -> bool {
        self.properties.contains(CharPropFlags::NOTIFY)
    }

    /// Check if the characteristic can indicate.
    pub fn can_indicate(&self) -> bool {
        self.properties.contains(CharPropFlags::INDICATE)
    }

    /// Check if the characteristic accepts the given kind of write.
    pub fn can_write(&self, with_response: bool) -> bool {
        if with_response {
            self.properties.contains(CharPropFlags::WRITE)
        } else {
            self.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        }
    }
}

/// A descriptor attached to a characteristic (e.g. the CCCD).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDescriptor {
    /// Descriptor UUID.
    pub uuid: Uuid,
    /// Descriptor handle.
    pub handle: u16,
    /// Value handle of the owning characteristic.
    pub parent_characteristic: u16,
}

impl AttributeDescriptor {
    /// Check if this is a Client Characteristic Configuration Descriptor.
    pub fn is_cccd(&self) -> bool {
        self.uuid == CCCD_UUID
    }
}

/// A characteristic together with its descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicNode {
    /// The characteristic.
    pub characteristic: CharacteristicDescriptor,
    /// Its descriptors in handle order.
    pub descriptors: Vec<AttributeDescriptor>,
}

/// A service together with its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNode {
    /// The service.
    pub service: ServiceDescriptor,
    /// Its characteristics in handle order.
    pub characteristics: Vec<CharacteristicNode>,
}

/// How a characteristic is looked up in a [`ServiceTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum CharacteristicRef {
    /// Exact value-handle match.
    Handle(u16),
    /// Exact UUID match; the first characteristic in discovery order wins.
    Uuid(Uuid),
}

impl From<u16> for CharacteristicRef {
    fn from(handle: u16) -> Self {
        Self::Handle(handle)
    }
}

impl From<Uuid> for CharacteristicRef {
    fn from(uuid: Uuid) -> Self {
        Self::Uuid(uuid)
    }
}

impl fmt::Display for CharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handle(handle) => write!(f, "handle {:#06x}", handle),
            Self::Uuid(uuid) => write!(f, "uuid {}", uuid),
        }
    }
}

/// Read-only attribute tree of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTree {
    link_id: u64,
    services: Vec<ServiceNode>,
}

impl ServiceTree {
    /// Build a tree for the given link.
    pub fn new(link_id: u64, services: Vec<ServiceNode>) -> Self {
        Self { link_id, services }
    }

    /// Link the tree was resolved on.
    pub fn link_id(&self) -> u64 {
        self.link_id
    }

    /// Get the services in discovery order.
    pub fn services(&self) -> &[ServiceNode] {
        &self.services
    }

    /// Iterate over every characteristic in discovery order.
    pub fn characteristics(&self) -> impl Iterator<Item = &CharacteristicNode> {
        self.services.iter().flat_map(|s| s.characteristics.iter())
    }

    /// Number of characteristics in the tree.
    pub fn characteristic_count(&self) -> usize {
        self.characteristics().count()
    }

    /// Find a characteristic by exact UUID or exact handle.
    ///
    /// Duplicate UUIDs resolve to the first match in discovery order; use a
    /// handle to pick a specific one.
    pub fn find_characteristic(
        &self,
        reference: CharacteristicRef,
    ) -> Result<&CharacteristicDescriptor> {
        self.find_node(reference).map(|node| &node.characteristic)
    }

    /// Find a characteristic and its descriptors.
    pub fn find_node(&self, reference: CharacteristicRef) -> Result<&CharacteristicNode> {
        self.characteristics()
            .find(|node| match reference {
                CharacteristicRef::Handle(handle) => node.characteristic.handle == handle,
                CharacteristicRef::Uuid(uuid) => node.characteristic.uuid == uuid,
            })
            .ok_or_else(|| Error::NotFound {
                reference: reference.to_string(),
            })
    }

    /// Find a descriptor of a characteristic by UUID.
    pub fn find_descriptor(
        &self,
        reference: CharacteristicRef,
        uuid: &Uuid,
    ) -> Result<Option<&AttributeDescriptor>> {
        let node = self.find_node(reference)?;
        Ok(node.descriptors.iter().find(|d| d.uuid == *uuid))
    }

    /// Fail unless this tree was resolved on the given connection.
    pub fn ensure_current(&self, connection: &Connection) -> Result<()> {
        connection.ensure_connected()?;
        if self.link_id != connection.link_id() {
            return Err(Error::StaleServiceTree {
                tree_link: self.link_id,
                link: connection.link_id(),
            });
        }
        Ok(())
    }
}

fn uuid_label(uuid: &Uuid) -> String {
    match uuids::describe(uuid) {
        Some(name) => format!("{} ({})", uuid, name),
        None => uuid.to_string(),
    }
}

impl fmt::Display for ServiceTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.services {
            writeln!(
                f,
                "Service {} [{:#06x}..{:#06x}]",
                uuid_label(&node.service.uuid),
                node.service.start_handle,
                node.service.end_handle
            )?;
            for characteristic in &node.characteristics {
                let c = &characteristic.characteristic;
                writeln!(
                    f,
                    "  Characteristic {} handle {:#06x} {:?}",
                    uuid_label(&c.uuid),
                    c.handle,
                    c.properties
                )?;
                for descriptor in &characteristic.descriptors {
                    writeln!(
                        f,
                        "    Descriptor {} handle {:#06x}",
                        uuid_label(&descriptor.uuid),
                        descriptor.handle
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Enumerates the attribute tree of a connected peripheral.
pub struct Resolver<'a, S: ?Sized> {
    stack: &'a S,
}

impl<'a, S: BleStack + ?Sized> Resolver<'a, S> {
    /// Create a resolver on top of a stack.
    pub fn new(stack: &'a S) -> Self {
        Self { stack }
    }

    /// Enumerate services, then characteristics, then descriptors.
    ///
    /// Any stack failure (including the link dropping mid-way) yields
    /// [`Error::ResolutionError`]; the caller must reconnect and resolve again.
    pub async fn resolve(&self, connection: &Connection) -> Result<ServiceTree> {
        connection.ensure_connected()?;

        let services = self
            .stack
            .discover_services()
            .await
            .map_err(|source| Error::ResolutionError {
                context: "services".to_string(),
                source,
            })?;

        let mut nodes = Vec::with_capacity(services.len());
        for service in services {
            debug!(
                "Found service: {} [{:#06x}..{:#06x}]",
                service.uuid, service.start_handle, service.end_handle
            );

            let characteristics = self
                .stack
                .discover_characteristics(&service)
                .await
                .map_err(|source| Error::ResolutionError {
                    context: format!("characteristics of service {}", service.uuid),
                    source,
                })?;

            let mut char_nodes = Vec::with_capacity(characteristics.len());
            for (i, characteristic) in characteristics.iter().enumerate() {
                // The next declaration sits one handle before the next value handle.
                let end_handle = characteristics
                    .get(i + 1)
                    .map(|next| next.handle.saturating_sub(2))
                    .unwrap_or(service.end_handle);

                let descriptors = self
                    .stack
                    .discover_descriptors(characteristic, end_handle)
                    .await
                    .map_err(|source| Error::ResolutionError {
                        context: format!(
                            "descriptors of characteristic {:#06x}",
                            characteristic.handle
                        ),
                        source,
                    })?;

                debug!(
                    "Found characteristic: {} handle {:#06x} ({} descriptors)",
                    characteristic.uuid,
                    characteristic.handle,
                    descriptors.len()
                );

                char_nodes.push(CharacteristicNode {
                    characteristic: *characteristic,
                    descriptors,
                });
            }

            nodes.push(ServiceNode {
                service,
                characteristics: char_nodes,
            });
        }

        let tree = ServiceTree::new(connection.link_id(), nodes);
        info!(
            "Resolved {} services, {} characteristics",
            tree.services().len(),
            tree.characteristic_count()
        );
        Ok(tree)
    }
}

/// Look up a characteristic in a tree by exact UUID or handle.
pub fn find_characteristic(
    tree: &ServiceTree,
    reference: impl Into<CharacteristicRef>,
) -> Result<&CharacteristicDescriptor> {
    tree.find_characteristic(reference.into())
}
