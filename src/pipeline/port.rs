//! Port descriptors for the node system.
//!
//! Each process object declares its ports (inputs/outputs) as a list of
//! `PortDescriptor`s. The node uses these to validate connections and the
//! presence of required inputs before executing.

use serde::Serialize;

/// Data type name accepted by ports that take any data object.
pub const ANY_DATA: &str = "DataObject";

/// Whether a port is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PortDirection {
    Input,
    Output,
}

impl PortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            PortDirection::Input => "input",
            PortDirection::Output => "output",
        }
    }
}

/// Static descriptor for a node's port.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortDescriptor {
    pub index: u32,
    pub name: &'static str,
    pub direction: PortDirection,
    /// Class name of the data carried, or [`ANY_DATA`].
    pub data_type: &'static str,
    /// Only meaningful for inputs: execution fails when a required input is unconnected.
    pub required: bool,
}

impl PortDescriptor {
    pub const fn input(index: u32, name: &'static str, data_type: &'static str) -> Self {
        Self {
            index,
            name,
            direction: PortDirection::Input,
            data_type,
            required: true,
        }
    }

    pub const fn optional_input(index: u32, name: &'static str, data_type: &'static str) -> Self {
        Self {
            index,
            name,
            direction: PortDirection::Input,
            data_type,
            required: false,
        }
    }

    pub const fn output(index: u32, name: &'static str, data_type: &'static str) -> Self {
        Self {
            index,
            name,
            direction: PortDirection::Output,
            data_type,
            required: false,
        }
    }

    /// Whether data of `other` type may flow into this port.
    pub fn accepts(&self, other: &str) -> bool {
        self.data_type == ANY_DATA || other == ANY_DATA || self.data_type == other
    }
}

/// Find the descriptor of `index` in `direction`.
pub fn find_port(
    ports: &[PortDescriptor],
    direction: PortDirection,
    index: u32,
) -> Option<&PortDescriptor> {
    ports
        .iter()
        .find(|p| p.direction == direction && p.index == index)
}
