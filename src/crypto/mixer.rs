//! Composition layer: chained hashes and layered ciphers.
//!
//! A `Mixer` is the database's symmetric cipher: an ordered pipeline of
//! cipher instances, each with its own key and IV. A `Hasher` chains hash
//! primitives for a number of full passes, and a `KeyHasher` expands one
//! password into one key per mixer element.
//!
//! A mixer is single-ownership: its element IVs are overwritten on every
//! operation, so it must not be shared across threads. The opposite-direction
//! mixer is a separate instance, not a view.

use crate::crypto::cipher::Cipher;
use crate::crypto::hash::Hash;
use crate::encoding::random_bytes;
use crate::error::{Error, Result};

/// Element of a [`Hasher`] or [`KeyHasher`] chain: a primitive hash or a
/// nested hasher. Nesting flattens via ordinary composition.
#[derive(Debug, Clone, PartialEq)]
pub enum HashElement {
    Hash(Hash),
    Hasher(Hasher),
}

impl HashElement {
    pub fn digest_size(&self) -> usize {
        match self {
            HashElement::Hash(hash) => hash.digest_size(),
            HashElement::Hasher(hasher) => hasher.digest_size(),
        }
    }

    pub fn process(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            HashElement::Hash(hash) => hash.process(data),
            HashElement::Hasher(hasher) => hasher.process(data),
        }
    }
}

impl From<Hash> for HashElement {
    fn from(hash: Hash) -> Self {
        HashElement::Hash(hash)
    }
}

impl From<Hasher> for HashElement {
    fn from(hasher: Hasher) -> Self {
        HashElement::Hasher(hasher)
    }
}

/// An ordered, possibly nested chain of hashes run for `iterations` passes.
///
/// Processing applies every element in order, then repeats the whole chain,
/// feeding each stage's output into the next. The effective digest size is
/// the digest size of the last element.
#[derive(Debug, Clone, PartialEq)]
pub struct Hasher {
    elements: Vec<HashElement>,
    iterations: u32,
}

impl Hasher {
    pub fn new(elements: Vec<HashElement>, iterations: u32) -> Self {
        assert!(!elements.is_empty(), "hasher requires at least one element");
        assert!(iterations >= 1, "hasher requires at least one iteration");
        Self { elements, iterations }
    }

    pub fn elements(&self) -> &[HashElement] {
        &self.elements
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn digest_size(&self) -> usize {
        self.elements.last().expect("hasher is never empty").digest_size()
    }

    pub fn process(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut accum = data.to_vec();
        for _ in 0..self.iterations {
            for element in &self.elements {
                accum = element.process(&accum)?;
            }
        }
        Ok(accum)
    }
}

/// Expands a password into one derived key per element.
///
/// The i-th key is the composition of the first i+1 elements applied to the
/// password, so later keys depend on every earlier stage.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyHasher {
    elements: Vec<HashElement>,
}

impl KeyHasher {
    pub fn new(elements: Vec<HashElement>) -> Self {
        assert!(!elements.is_empty(), "key hasher requires at least one element");
        Self { elements }
    }

    pub fn elements(&self) -> &[HashElement] {
        &self.elements
    }

    pub fn key_sizes(&self) -> Vec<usize> {
        self.elements.iter().map(HashElement::digest_size).collect()
    }

    pub fn process(&self, password: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::with_capacity(self.elements.len());
        let mut accum = password.to_vec();
        for element in &self.elements {
            accum = element.process(&accum)?;
            keys.push(accum.clone());
        }
        Ok(keys)
    }
}

/// An ordered pipeline of ciphers forming the layered database cipher.
#[derive(Debug, Clone, PartialEq)]
pub struct Mixer {
    elements: Vec<Cipher>,
    is_keys_set: bool,
    opp: Option<Box<Mixer>>,
}

impl Mixer {
    pub fn new(elements: Vec<Cipher>) -> Self {
        assert!(!elements.is_empty(), "mixer requires at least one element");
        Self { elements, is_keys_set: false, opp: None }
    }

    pub fn with_keys(elements: Vec<Cipher>, keys: Vec<Vec<u8>>) -> Self {
        let mut mixer = Self::new(elements);
        mixer.set_keys(keys);
        mixer
    }

    pub fn elements(&self) -> &[Cipher] {
        &self.elements
    }

    pub fn elem_count(&self) -> usize {
        self.elements.len()
    }

    pub fn is_keys_set(&self) -> bool {
        self.is_keys_set
    }

    pub fn iv_sizes(&self) -> Vec<usize> {
        self.elements.iter().map(|elem| elem.kind().iv_size()).collect()
    }

    pub fn iv_size_total(&self) -> usize {
        self.iv_sizes().iter().sum()
    }

    pub fn key_sizes(&self) -> Vec<usize> {
        self.elements.iter().map(|elem| elem.kind().key_size()).collect()
    }

    /// Assigns exactly one key per element. Count or size mismatch is a
    /// programmer fault.
    pub fn set_keys(&mut self, keys: Vec<Vec<u8>>) {
        assert_eq!(keys.len(), self.elements.len(), "one key per mixer element");
        for (element, key) in self.elements.iter_mut().zip(keys) {
            element.set_key(key);
        }
        self.is_keys_set = true;
    }

    /// Applies every element in order. Keys must be set.
    pub fn process(&self, data: &[u8]) -> Result<Vec<u8>> {
        assert!(self.is_keys_set, "mixer keys not set");
        let mut accum = data.to_vec();
        for element in &self.elements {
            accum = element.process(&accum)?;
        }
        Ok(accum)
    }

    /// Builds the opposite-direction mixer: reversed element order with
    /// reversed keys, ready to decrypt.
    pub fn opposite_instance(&self) -> Mixer {
        assert!(self.is_keys_set, "mixer keys not set");
        let elements: Vec<Cipher> =
            self.elements.iter().rev().map(Cipher::opposite_instance).collect();
        Mixer { elements, is_keys_set: true, opp: None }
    }

    /// Builds the opposite-direction mixer and stores it on this instance
    /// for the decryption paths.
    pub fn make_opposite(&mut self) {
        let opp = self.opposite_instance();
        self.opp = Some(Box::new(opp));
    }

    pub fn opp(&self) -> Option<&Mixer> {
        self.opp.as_deref()
    }

    /// The stored opposite-direction mixer. Calling this before
    /// [`Mixer::make_opposite`] is a programmer fault.
    pub fn opp_mut(&mut self) -> &mut Mixer {
        self.opp.as_deref_mut().expect("opposite mixer not prepared")
    }

    /// Restores IVs from a concatenated blob as produced by
    /// [`Mixer::iv_set_random`]. The per-element slice order is reversed
    /// before assignment: this mixer is the opposite of the one that
    /// encrypted, so the last encryption IV must be consumed first.
    pub fn iv_set(&mut self, blob: &[u8]) -> Result<()> {
        let parts = split_bytes(blob, &self.iv_sizes())?;
        self.iv_set_parts(parts, true);
        Ok(())
    }

    /// Assigns per-element IVs, optionally reversing the slice order.
    pub fn iv_set_parts(&mut self, parts: Vec<Vec<u8>>, reverse: bool) {
        assert_eq!(parts.len(), self.elements.len(), "one iv per mixer element");
        let parts: Vec<Vec<u8>> =
            if reverse { parts.into_iter().rev().collect() } else { parts };
        for (element, part) in self.elements.iter_mut().zip(parts) {
            element.set_iv(part);
        }
    }

    /// Draws a fresh random IV per element, applies them without reversal,
    /// and returns their concatenation in element order for persistence.
    pub fn iv_set_random(&mut self) -> Vec<u8> {
        let parts: Vec<Vec<u8>> =
            self.iv_sizes().into_iter().map(random_bytes).collect();
        let blob = parts.concat();
        self.iv_set_parts(parts, false);
        blob
    }
}

fn split_bytes(data: &[u8], sizes: &[usize]) -> Result<Vec<Vec<u8>>> {
    if sizes.iter().sum::<usize>() != data.len() {
        return Err(Error::storage("iv blob length does not match mixer layout"));
    }
    let mut parts = Vec::with_capacity(sizes.len());
    let mut begin = 0;
    for &size in sizes {
        parts.push(data[begin..begin + size].to_vec());
        begin += size;
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher::CipherKind;
    use crate::encoding::random_bytes;

    fn mixer_with_random_keys(kinds: &[CipherKind]) -> Mixer {
        let elements = kinds.iter().map(|&kind| Cipher::encryptor(kind)).collect();
        let mut mixer = Mixer::new(elements);
        let keys = mixer.key_sizes().into_iter().map(random_bytes).collect();
        mixer.set_keys(keys);
        mixer
    }

    fn check_mixer_roundtrip(mixer: &mut Mixer, data_size: usize) {
        let data = random_bytes(data_size);
        let iv = mixer.iv_set_random();
        assert_eq!(iv.len(), mixer.iv_size_total());
        let crypted = mixer.process(&data).unwrap();
        let mut opp = mixer.opposite_instance();
        opp.iv_set(&iv).unwrap();
        assert_eq!(opp.process(&crypted).unwrap(), data);
        // and back again: the opposite of the opposite re-encrypts,
        // consuming the blob in original element order
        let mut back = opp.opposite_instance();
        back.iv_set_parts(split_bytes(&iv, &back.iv_sizes()).unwrap(), false);
        assert_eq!(back.process(&data).unwrap(), crypted);
    }

    #[test]
    fn test_single_element_roundtrip() {
        let mut mixer = mixer_with_random_keys(&[CipherKind::Aes256Ctr]);
        check_mixer_roundtrip(&mut mixer, 1024);
    }

    #[test]
    fn test_two_element_roundtrip() {
        let mut mixer = mixer_with_random_keys(&[CipherKind::Aes256Ctr, CipherKind::ChaCha20]);
        check_mixer_roundtrip(&mut mixer, 1024);
        check_mixer_roundtrip(&mut mixer, 999);
    }

    #[test]
    fn test_three_element_roundtrip() {
        let mut mixer = mixer_with_random_keys(&[
            CipherKind::Aes256Ctr,
            CipherKind::Camellia256Ctr,
            CipherKind::ChaCha20,
        ]);
        check_mixer_roundtrip(&mut mixer, 100_000);
    }

    #[test]
    fn test_mixer_equals_manual_chain() {
        let mut mixer = mixer_with_random_keys(&[
            CipherKind::Aes256Ctr,
            CipherKind::Camellia256Ctr,
            CipherKind::ChaCha20,
        ]);
        let ivs: Vec<Vec<u8>> = (0..3).map(|_| random_bytes(16)).collect();
        mixer.iv_set_parts(ivs.clone(), false);
        let data = random_bytes(100);
        let mut manual = data.clone();
        for element in mixer.elements() {
            manual = element.process(&manual).unwrap();
        }
        assert_eq!(mixer.process(&data).unwrap(), manual);

        let mut opp = mixer.opposite_instance();
        opp.iv_set_parts(ivs, true);
        assert_eq!(opp.process(&manual).unwrap(), data);
    }

    #[test]
    fn test_iv_blob_reversal_matters() {
        // with two distinct elements a non-reversed restore must not decrypt
        let mut mixer = mixer_with_random_keys(&[CipherKind::Aes256Ctr, CipherKind::ChaCha20]);
        let data = random_bytes(64);
        let iv = mixer.iv_set_random();
        let crypted = mixer.process(&data).unwrap();
        let mut opp = mixer.opposite_instance();
        opp.iv_set_parts(split_bytes(&iv, &opp.iv_sizes()).unwrap(), false);
        assert_ne!(opp.process(&crypted).unwrap(), data);
    }

    #[test]
    fn test_iv_blob_length_checked() {
        let mut mixer = mixer_with_random_keys(&[CipherKind::Aes256Ctr, CipherKind::ChaCha20]);
        assert!(mixer.iv_set(&random_bytes(31)).is_err());
    }

    #[test]
    #[should_panic(expected = "mixer keys not set")]
    fn test_process_without_keys_panics() {
        let mut mixer = Mixer::new(vec![Cipher::encryptor(CipherKind::Aes256Ctr)]);
        mixer.iv_set_random();
        let _ = mixer.process(b"data");
    }

    #[test]
    fn test_hasher_iterations() {
        let single = Hasher::new(vec![Hash::Sha3_512.into(), Hash::Sha3_256.into()], 1);
        let double = Hasher::new(vec![Hash::Sha3_512.into(), Hash::Sha3_256.into()], 2);
        let data = random_bytes(1024);
        let manual = single.process(&single.process(&data).unwrap()).unwrap();
        assert_eq!(double.process(&data).unwrap(), manual);
        assert_ne!(single.process(b"1").unwrap(), double.process(b"1").unwrap());
    }

    #[test]
    fn test_hasher_order_matters() {
        let forward = Hasher::new(vec![Hash::Sha3_512.into(), Hash::Sha3_256.into()], 1);
        let backward = Hasher::new(vec![Hash::Sha3_256.into(), Hash::Sha3_512.into()], 1);
        assert_ne!(forward.process(b"1").unwrap(), backward.process(b"1").unwrap());
    }

    #[test]
    fn test_hasher_digest_size_is_last_element() {
        let hasher = Hasher::new(vec![Hash::Sha3_512.into(), Hash::Sha3_224.into()], 3);
        assert_eq!(hasher.digest_size(), 28);
        assert_eq!(hasher.process(b"abc").unwrap().len(), 28);
    }

    #[test]
    fn test_nested_hasher_flattens() {
        let inner = Hasher::new(
            vec![Hash::shake128(50).unwrap().into(), Hash::Sha3_224.into()],
            2,
        );
        let outer = Hasher::new(vec![inner.clone().into(), Hash::Sha3_256.into()], 10);
        let data = random_bytes(1024);
        let mut manual = data.clone();
        for _ in 0..10 {
            manual = inner.process(&manual).unwrap();
            manual = Hash::Sha3_256.process(&manual).unwrap();
        }
        assert_eq!(outer.process(&data).unwrap(), manual);
    }

    #[test]
    fn test_key_hasher_chains_stages() {
        let key_hasher = KeyHasher::new(vec![Hash::Sha3_512.into(), Hash::Sha3_256.into()]);
        let password = random_bytes(1024);
        let keys = key_hasher.process(&password).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], Hash::Sha3_512.process(&password).unwrap());
        assert_eq!(keys[1], Hash::Sha3_256.process(&keys[0]).unwrap());
        for (key, size) in keys.iter().zip(key_hasher.key_sizes()) {
            assert_eq!(key.len(), size);
        }
    }

    #[test]
    fn test_key_hasher_sha3_512_abc() {
        let key_hasher = KeyHasher::new(vec![Hash::Sha3_512.into()]);
        let keys = key_hasher.process(b"abc").unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0], Hash::Sha3_512.process(b"abc").unwrap());
    }

    #[test]
    fn test_key_hasher_with_nested_hashers() {
        let stage1 = Hasher::new(vec![Hash::Sha3_512.into()], 10);
        let stage2 = Hasher::new(
            vec![Hash::shake256(40).unwrap().into(), Hash::Sha3_224.into()],
            5,
        );
        let key_hasher = KeyHasher::new(vec![stage1.clone().into(), stage2.clone().into()]);
        let password = random_bytes(64);
        let keys = key_hasher.process(&password).unwrap();
        let first = stage1.process(&password).unwrap();
        let second = stage2.process(&first).unwrap();
        assert_eq!(keys, vec![first, second]);
    }
}
