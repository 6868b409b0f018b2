//! Out-of-band metadata ("extra data") item registry and the dequeue/send
//! passes that move items between the shared original header and the
//! caller's copy.

use std::collections::HashMap;
use std::sync::OnceLock;

use stagewire_core::buffer::{BufferHeader, ExtraDataItem, ExtraDataKind};

/// Layout descriptor for one metadata item kind.
#[derive(Debug, Clone, Copy)]
pub struct ExtraDataDescriptor {
    pub kind: ExtraDataKind,
    /// Bit this kind occupies in a header's `extra_found` word.
    pub bit: u32,
    /// Bytes reserved for the item when an output pass requests space.
    pub reserve_len: usize,
}

fn registry() -> &'static HashMap<ExtraDataKind, ExtraDataDescriptor> {
    static REGISTRY: OnceLock<HashMap<ExtraDataKind, ExtraDataDescriptor>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let entries = [
            (ExtraDataKind::FrameInfo, 1 << 0, 64),
            (ExtraDataKind::InterlaceFormat, 1 << 1, 8),
            (ExtraDataKind::FrameQp, 1 << 2, 4),
            (ExtraDataKind::FrameBitsInfo, 1 << 3, 8),
            (ExtraDataKind::FrameDimension, 1 << 4, 16),
            (ExtraDataKind::StreamUserData, 1 << 5, 256),
        ];
        entries
            .into_iter()
            .map(|(kind, bit, reserve_len)| {
                (kind, ExtraDataDescriptor { kind, bit, reserve_len })
            })
            .collect()
    })
}

pub fn descriptor_for(kind: ExtraDataKind) -> ExtraDataDescriptor {
    registry()[&kind]
}

pub fn found_bit(kind: ExtraDataKind) -> u32 {
    descriptor_for(kind).bit
}

/// Input dequeue pass: copy the located items the port is configured for
/// into the caller's header and record what was found.
pub(crate) fn unpack_for_input(caller: &mut BufferHeader, configured: &[ExtraDataKind]) {
    let mut found = 0u32;
    let mut kept = Vec::new();
    for item in caller.extension.metadata.drain(..) {
        if configured.contains(&item.kind) {
            found |= found_bit(item.kind);
            kept.push(item);
        }
    }
    caller.extension.metadata = kept;
    caller.extension.extra_found = found;
}

/// Output dequeue pass: the producer's found-bitfield drives which items
/// get space reserved in the caller's header.
pub(crate) fn reserve_for_output(caller: &mut BufferHeader, configured: &[ExtraDataKind]) {
    let requested = caller.extension.extra_found;
    caller.extension.metadata.clear();
    for kind in configured {
        let descriptor = descriptor_for(*kind);
        if requested & descriptor.bit != 0 {
            caller.extension.metadata.push(ExtraDataItem {
                kind: *kind,
                payload: vec![0u8; descriptor.reserve_len],
            });
        }
    }
}

/// Output send pass, the inverse of [`reserve_for_output`]: pack the
/// caller's filled items back onto the shared original.
pub(crate) fn pack_for_output(caller: &BufferHeader, original: &mut BufferHeader, configured: &[ExtraDataKind]) {
    let mut found = 0u32;
    original.extension.metadata.clear();
    for item in &caller.extension.metadata {
        if configured.contains(&item.kind) {
            found |= found_bit(item.kind);
            original.extension.metadata.push(item.clone());
        }
    }
    original.extension.extra_found = found;
}
