//! Layer lookups over a completed structure. Layer 1 rests on the surface.

use crate::annotation::CompletedStructure;

fn same_name(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Final layer of `name`, matched case-insensitively. A flat stack lists names
/// top to bottom, so its last entry is layer 1. `None` when the object is not
/// part of the structure.
pub fn find_layer(name: &str, structure: &CompletedStructure) -> Option<u32> {
    match structure {
        CompletedStructure::Flat(names) => {
            let total = names.len() as u32;
            names
                .iter()
                .position(|n| same_name(n, name))
                .map(|i| total - i as u32)
        }
        CompletedStructure::Layered(records) => records
            .iter()
            .find(|r| same_name(&r.object, name))
            .map(|r| r.layer),
    }
}

/// Every object paired with its layer, in structure order.
pub fn layered_names(structure: &CompletedStructure) -> Vec<(String, u32)> {
    match structure {
        CompletedStructure::Flat(names) => {
            let total = names.len() as u32;
            names
                .iter()
                .enumerate()
                .map(|(i, n)| (n.clone(), total - i as u32))
                .collect()
        }
        CompletedStructure::Layered(records) => {
            records.iter().map(|r| (r.object.clone(), r.layer)).collect()
        }
    }
}

/// Objects on any layer strictly above `layer`, contact or not.
pub fn objects_above(structure: &CompletedStructure, layer: u32) -> Vec<String> {
    layered_names(structure)
        .into_iter()
        .filter(|(_, l)| *l > layer)
        .map(|(n, _)| n)
        .collect()
}

/// Objects on any layer strictly below `layer`.
pub fn objects_below(structure: &CompletedStructure, layer: u32) -> Vec<String> {
    layered_names(structure)
        .into_iter()
        .filter(|(_, l)| *l < layer)
        .map(|(n, _)| n)
        .collect()
}
