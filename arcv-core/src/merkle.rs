use std::collections::BTreeMap;

/// Compute a simple binary Merkle root over BLAKE3 leaf hashes.
/// Duplicates the last node when the layer is odd.
pub fn root(hashes: &[blake3::Hash]) -> blake3::Hash {
    if hashes.is_empty() {
        return blake3::hash(&[]);
    }
    let mut layer: Vec<[u8; 32]> = hashes.iter().map(|h| *h.as_bytes()).collect();
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len().div_ceil(2));
        for pair in layer.chunks(2) {
            let a = pair[0];
            let b = if pair.len() == 2 { pair[1] } else { pair[0] };
            let mut cat = [0u8; 64];
            cat[..32].copy_from_slice(&a);
            cat[32..].copy_from_slice(&b);
            next.push(*blake3::hash(&cat).as_bytes());
        }
        layer = next;
    }
    blake3::Hash::from(layer[0])
}

/// Leaf for one manifest line: `name \0 digest`.
pub fn manifest_leaf(name: &str, digest_hex: &str) -> blake3::Hash {
    let mut h = blake3::Hasher::new();
    h.update(name.as_bytes());
    h.update(&[0]);
    h.update(digest_hex.as_bytes());
    h.finalize()
}

/// Root over a manifest's entries in name order.
pub fn manifest_root(entries: &BTreeMap<String, String>) -> blake3::Hash {
    let leaves: Vec<blake3::Hash> =
        entries.iter().map(|(name, digest)| manifest_leaf(name, digest)).collect();
    root(&leaves)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(n, d)| (n.to_string(), d.to_string())).collect()
    }

    #[test]
    fn odd_layer_duplicates_last() {
        let a = blake3::hash(b"a");
        let b = blake3::hash(b"b");
        let c = blake3::hash(b"c");
        let ab = {
            let mut cat = [0u8; 64];
            cat[..32].copy_from_slice(a.as_bytes());
            cat[32..].copy_from_slice(b.as_bytes());
            blake3::hash(&cat)
        };
        let cc = {
            let mut cat = [0u8; 64];
            cat[..32].copy_from_slice(c.as_bytes());
            cat[32..].copy_from_slice(c.as_bytes());
            blake3::hash(&cat)
        };
        assert_eq!(root(&[a, b, c]), root(&[ab, cc]));
    }

    #[test]
    fn root_changes_with_any_digest_or_name() {
        let base = manifest_root(&entries(&[("a.txt", "00"), ("b.txt", "11")]));
        assert_ne!(base, manifest_root(&entries(&[("a.txt", "00"), ("b.txt", "12")])));
        assert_ne!(base, manifest_root(&entries(&[("a.txt", "00"), ("c.txt", "11")])));
        assert_ne!(base, manifest_root(&entries(&[("a.txt", "00")])));
    }

    #[test]
    fn name_digest_boundary_is_unambiguous() {
        assert_ne!(manifest_leaf("ab", "c"), manifest_leaf("a", "bc"));
    }
}
