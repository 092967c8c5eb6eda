// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Transfer ports.

use dynamo_memory::{Buffer, MemoryDescription, StorageKind};

use crate::address::{AddressEntry, AddressList, AddressListCursor};
use crate::{DmaError, Result};

/// Description of one endpoint handed to a channel when creating a descriptor.
#[derive(Debug, Clone)]
pub struct PortSpec {
    /// Directly addressable memory, or `None` for a pure gather/scatter port
    /// whose bytes are accounted without any device operation.
    pub memory: Option<Buffer>,
    pub addresses: AddressList,
}

impl PortSpec {
    pub fn new(memory: Buffer, addresses: AddressList) -> Self {
        Self {
            memory: Some(memory),
            addresses,
        }
    }

    /// A port without addressable memory.
    pub fn absent(addresses: AddressList) -> Self {
        Self {
            memory: None,
            addresses,
        }
    }

    /// A port covering the whole of `memory` as one contiguous range.
    pub fn whole(memory: Buffer) -> Result<Self> {
        let entry = AddressEntry::linear(0, memory.size())?;
        Ok(Self::new(memory, AddressList::from_entries([entry])))
    }
}

/// One endpoint of a transfer descriptor.
#[derive(Debug)]
pub struct TransferPort {
    memory: Option<Buffer>,
    pub(crate) cursor: AddressListCursor,
    // bytes handed to the device (or skipped), i.e. the next span start
    bytes_submitted: u64,
}

impl TransferPort {
    pub(crate) fn new(spec: PortSpec) -> Result<Self> {
        let PortSpec { memory, addresses } = spec;
        let mut port = Self {
            memory,
            cursor: AddressListCursor::default(),
            bytes_submitted: 0,
        };
        for entry in addresses.iter() {
            port.check_bounds(entry)?;
        }
        port.cursor = AddressListCursor::new(addresses);
        Ok(port)
    }

    fn check_bounds(&self, entry: &AddressEntry) -> Result<()> {
        let Some(memory) = &self.memory else {
            return Ok(());
        };
        if entry.end() > memory.size() {
            return Err(DmaError::InvalidPortWiring(format!(
                "address range ends at {} but the {} memory holds {} bytes",
                entry.end(),
                memory.storage_kind(),
                memory.size()
            )));
        }
        Ok(())
    }

    /// Append an address entry; rejected after end-of-stream.
    pub(crate) fn append(&mut self, entry: AddressEntry) -> Result<()> {
        if self.cursor.list().is_eos() {
            return Err(DmaError::InvalidPortWiring(
                "address appended after end-of-stream".into(),
            ));
        }
        self.check_bounds(&entry)?;
        self.cursor.push(entry);
        Ok(())
    }

    pub(crate) fn mark_eos(&mut self) {
        self.cursor.mark_eos();
    }

    pub fn memory(&self) -> Option<&Buffer> {
        self.memory.as_ref()
    }

    pub fn storage_kind(&self) -> Option<StorageKind> {
        self.memory.as_ref().map(|m| m.storage_kind())
    }

    /// Base address of the port memory.
    pub fn base(&self) -> Option<usize> {
        self.memory.as_ref().map(|m| m.addr())
    }

    pub fn bytes_submitted(&self) -> u64 {
        self.bytes_submitted
    }

    /// Claim the next `bytes` of the port's stream, returning the span start.
    pub(crate) fn claim_span(&mut self, bytes: usize) -> u64 {
        let start = self.bytes_submitted;
        self.bytes_submitted += bytes as u64;
        start
    }

    pub fn is_drained(&self) -> bool {
        self.cursor.is_drained()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use dynamo_memory::{SystemStorage, create_buffer};

    #[test]
    fn test_bounds_checked() {
        let memory = create_buffer(SystemStorage::new(256).unwrap());
        let list = AddressList::from_entries([AddressEntry::strided_2d(0, 64, 4, 64).unwrap()]);
        assert!(TransferPort::new(PortSpec::new(memory.clone(), list)).is_ok());

        let list = AddressList::from_entries([AddressEntry::strided_2d(8, 64, 4, 64).unwrap()]);
        assert_matches!(
            TransferPort::new(PortSpec::new(memory, list)),
            Err(DmaError::InvalidPortWiring(_))
        );
    }

    #[test]
    fn test_absent_port_accepts_any_range() {
        let list = AddressList::from_entries([AddressEntry::linear(1 << 40, 64).unwrap()]);
        let port = TransferPort::new(PortSpec::absent(list)).unwrap();
        assert!(port.base().is_none());
        assert_eq!(port.cursor.bytes_pending(), 64);
    }

    #[test]
    fn test_append_and_claim() {
        let memory = create_buffer(SystemStorage::new(128).unwrap());
        let mut port = TransferPort::new(PortSpec::new(memory, AddressList::new())).unwrap();
        port.append(AddressEntry::linear(0, 64).unwrap()).unwrap();
        assert_matches!(
            port.append(AddressEntry::linear(100, 64).unwrap()),
            Err(DmaError::InvalidPortWiring(_))
        );

        assert_eq!(port.claim_span(40), 0);
        assert_eq!(port.claim_span(24), 40);
        assert_eq!(port.bytes_submitted(), 64);

        port.mark_eos();
        assert_matches!(
            port.append(AddressEntry::linear(0, 8).unwrap()),
            Err(DmaError::InvalidPortWiring(_))
        );
    }
}
