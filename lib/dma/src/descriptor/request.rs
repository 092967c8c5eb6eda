// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use derive_builder::Builder;

use crate::port::PortSpec;

/// Everything a channel needs to build a transfer descriptor.
///
/// ```rust,ignore
/// let request = DescriptorRequest::builder()
///     .input(PortSpec::whole(src)?)
///     .output(PortSpec::whole(dst)?)
///     .priority(2)
///     .build()?;
/// let xd = channel.create_descriptor(request)?;
/// ```
#[derive(Debug, Clone, Default, Builder)]
#[builder(pattern = "owned", default)]
pub struct DescriptorRequest {
    /// Source ports, consumed in order. Empty for fills.
    #[builder(setter(each(name = "input")))]
    pub inputs: Vec<PortSpec>,

    /// Destination ports, consumed in order.
    #[builder(setter(each(name = "output")))]
    pub outputs: Vec<PortSpec>,

    /// Higher runs first within a channel queue.
    pub priority: i32,

    /// Caller-assigned identifier; the channel assigns one when unset.
    #[builder(setter(strip_option))]
    pub guid: Option<u64>,

    /// Pattern written to every element of the outputs. Makes this a fill.
    #[builder(setter(strip_option, into))]
    pub fill_pattern: Option<Vec<u8>>,

    /// Reduction operator id. No channel in this engine supports reductions.
    #[builder(setter(strip_option))]
    pub redop: Option<u32>,
}

impl DescriptorRequest {
    pub fn builder() -> DescriptorRequestBuilder {
        DescriptorRequestBuilder::default()
    }

    /// A plain copy from `input` to `output`.
    pub fn copy(input: PortSpec, output: PortSpec) -> Self {
        Self {
            inputs: vec![input],
            outputs: vec![output],
            ..Self::default()
        }
    }

    /// A fill of `output` with `pattern`.
    pub fn fill(output: PortSpec, pattern: impl Into<Vec<u8>>) -> Self {
        Self {
            outputs: vec![output],
            fill_pattern: Some(pattern.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{AddressEntry, AddressList};

    fn port() -> PortSpec {
        PortSpec::absent(AddressList::from_entries([AddressEntry::linear(0, 8).unwrap()]))
    }

    #[test]
    fn test_builder() {
        let request = DescriptorRequest::builder()
            .input(port())
            .output(port())
            .output(port())
            .priority(3)
            .fill_pattern(vec![1, 2])
            .build()
            .unwrap();
        assert_eq!(request.inputs.len(), 1);
        assert_eq!(request.outputs.len(), 2);
        assert_eq!(request.priority, 3);
        assert_eq!(request.fill_pattern, Some(vec![1, 2]));
        assert!(request.redop.is_none());
        assert!(request.guid.is_none());
    }

    #[test]
    fn test_shorthands() {
        let copy = DescriptorRequest::copy(port(), port());
        assert!(copy.fill_pattern.is_none());
        let fill = DescriptorRequest::fill(port(), [0x5A]);
        assert!(fill.inputs.is_empty());
        assert_eq!(fill.fill_pattern, Some(vec![0x5A]));
    }
}
