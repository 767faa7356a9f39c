//! Tagged-tree serialization for algorithm objects and small values.
//!
//! Every non-trivial node is a JSON object carrying an integer type tag in
//! the reserved `$$` field. Builtin value tags are negative; algorithm tags
//! are positive and equal the algorithm ID. Null, booleans, numbers,
//! strings, and lists are represented as themselves and recognized by their
//! native JSON type.
//!
//! Round-trip law: `deserialize(serialize(v))` is structurally equal to `v`
//! for every value that does not contain cipher keys. The `key` parameter of
//! a cipher is never written; callers reinject it after deserialization.

use serde_json::{Map, Number, Value as Json};

use crate::crypto::cipher::{Cipher, CipherKind};
use crate::crypto::hash::Hash;
use crate::crypto::mixer::{HashElement, Hasher, KeyHasher, Mixer};
use crate::encoding::{decode_base64, encode_base64};
use crate::error::{Error, Result};

/// Reserved field carrying the type tag.
pub const ID_KEY: &str = "$$";

pub const TAG_NULL: i64 = -1;
pub const TAG_BOOL: i64 = -2;
pub const TAG_INT: i64 = -3;
pub const TAG_FLOAT: i64 = -4;
pub const TAG_STR: i64 = -5;
pub const TAG_LIST: i64 = -6;
pub const TAG_TUPLE: i64 = -7;
pub const TAG_SET: i64 = -8;
pub const TAG_FROZEN_SET: i64 = -9;
pub const TAG_DICT: i64 = -10;
pub const TAG_BYTES: i64 = -11;
pub const TAG_BYTE_ARRAY: i64 = -12;
pub const TAG_RANGE: i64 = -13;
pub const TAG_ELLIPSIS: i64 = -14;

pub const TAG_MIXER: i64 = 2000;
pub const TAG_HASHER: i64 = 2001;
pub const TAG_KEY_HASHER: i64 = 2002;

/// A serializable value: the small polymorphic builtins plus the algorithm
/// objects the manifest and the description table persist.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Set(Vec<Value>),
    FrozenSet(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Bytes(Vec<u8>),
    ByteArray(Vec<u8>),
    Range { begin: i64, end: i64, step: i64 },
    Ellipsis,
    Hash(Hash),
    Cipher(Cipher),
    Mixer(Mixer),
    Hasher(Hasher),
    KeyHasher(KeyHasher),
}

impl Value {
    pub fn into_mixer(self) -> Result<Mixer> {
        match self {
            Value::Mixer(mixer) => Ok(mixer),
            other => Err(type_error("mixer", &other)),
        }
    }

    pub fn into_hasher(self) -> Result<Hasher> {
        match self {
            Value::Hasher(hasher) => Ok(hasher),
            other => Err(type_error("hasher", &other)),
        }
    }

    pub fn into_key_hasher(self) -> Result<KeyHasher> {
        match self {
            Value::KeyHasher(key_hasher) => Ok(key_hasher),
            other => Err(type_error("key hasher", &other)),
        }
    }
}

fn type_error(expected: &str, got: &Value) -> Error {
    Error::Serialization(format!("expected {expected}, got {got:?}"))
}

pub fn serialize(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number(Number::from(*i)),
        Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Str(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(items.iter().map(serialize).collect()),
        Value::Tuple(items) => wrapped_list(TAG_TUPLE, "v", items),
        Value::Set(items) => wrapped_list(TAG_SET, "k", items),
        Value::FrozenSet(items) => wrapped_list(TAG_FROZEN_SET, "k", items),
        Value::Dict(pairs) => {
            let items: Vec<Json> = pairs
                .iter()
                .map(|(k, v)| wrapped_list(TAG_TUPLE, "v", &[k.clone(), v.clone()]))
                .collect();
            tagged(TAG_DICT, [("i", Json::Array(items))])
        }
        Value::Bytes(data) => tagged(TAG_BYTES, [("v", Json::String(encode_base64(data)))]),
        Value::ByteArray(data) => tagged(TAG_BYTE_ARRAY, [("v", Json::String(encode_base64(data)))]),
        Value::Range { begin, end, step } => tagged(
            TAG_RANGE,
            [
                ("b", Json::Number(Number::from(*begin))),
                ("e", Json::Number(Number::from(*end))),
                ("s", Json::Number(Number::from(*step))),
            ],
        ),
        Value::Ellipsis => tagged(TAG_ELLIPSIS, []),
        Value::Hash(hash) => serialize_hash(hash),
        Value::Cipher(cipher) => serialize_cipher(cipher),
        Value::Mixer(mixer) => serialize_mixer(mixer),
        Value::Hasher(hasher) => serialize_hasher(hasher),
        Value::KeyHasher(key_hasher) => serialize_key_hasher(key_hasher),
    }
}

pub fn serialize_hash(hash: &Hash) -> Json {
    let mut object = tag_object(hash.algorithm_id());
    match hash {
        Hash::Shake128 { digest_size } | Hash::Shake256 { digest_size } => {
            object.insert("digest_size".into(), Json::Number(Number::from(*digest_size as i64)));
        }
        Hash::ScryptVar { digest_size, cost } => {
            object.insert("digest_size".into(), Json::Number(Number::from(*digest_size as i64)));
            insert_scrypt_cost(&mut object, cost.salt(), cost.n(), cost.r());
        }
        Hash::Scrypt128(cost) | Hash::Scrypt256(cost) | Hash::Scrypt512(cost) => {
            insert_scrypt_cost(&mut object, cost.salt(), cost.n(), cost.r());
        }
        Hash::Sha3_224 | Hash::Sha3_256 | Hash::Sha3_384 | Hash::Sha3_512 | Hash::Blake2b512 => {}
    }
    Json::Object(object)
}

/// Writes every current cipher parameter except the key.
pub fn serialize_cipher(cipher: &Cipher) -> Json {
    let mut object = tag_object(cipher.kind().algorithm_id());
    if let Some(iv) = cipher.iv() {
        object.insert("iv".into(), serialize(&Value::Bytes(iv.to_vec())));
    }
    Json::Object(object)
}

pub fn serialize_mixer(mixer: &Mixer) -> Json {
    let elements: Vec<Json> = mixer.elements().iter().map(serialize_cipher).collect();
    tagged(TAG_MIXER, [("elements", Json::Array(elements))])
}

pub fn serialize_hasher(hasher: &Hasher) -> Json {
    let elements: Vec<Json> = hasher.elements().iter().map(serialize_hash_element).collect();
    tagged(
        TAG_HASHER,
        [
            ("elements", Json::Array(elements)),
            ("iterations", Json::Number(Number::from(i64::from(hasher.iterations())))),
        ],
    )
}

pub fn serialize_key_hasher(key_hasher: &KeyHasher) -> Json {
    let elements: Vec<Json> =
        key_hasher.elements().iter().map(serialize_hash_element).collect();
    tagged(TAG_KEY_HASHER, [("elements", Json::Array(elements))])
}

fn serialize_hash_element(element: &HashElement) -> Json {
    match element {
        HashElement::Hash(hash) => serialize_hash(hash),
        HashElement::Hasher(hasher) => serialize_hasher(hasher),
    }
}

fn insert_scrypt_cost(object: &mut Map<String, Json>, salt: &[u8], n: u64, r: u32) {
    object.insert("salt".into(), serialize(&Value::Bytes(salt.to_vec())));
    object.insert("n".into(), Json::Number(Number::from(n as i64)));
    object.insert("r".into(), Json::Number(Number::from(i64::from(r))));
}

fn tag_object(tag: i64) -> Map<String, Json> {
    let mut object = Map::new();
    object.insert(ID_KEY.into(), Json::Number(Number::from(tag)));
    object
}

fn tagged<const N: usize>(tag: i64, fields: [(&str, Json); N]) -> Json {
    let mut object = tag_object(tag);
    for (name, value) in fields {
        object.insert(name.into(), value);
    }
    Json::Object(object)
}

fn wrapped_list(tag: i64, field: &str, items: &[Value]) -> Json {
    tagged(tag, [(field, Json::Array(items.iter().map(serialize).collect()))])
}

pub fn deserialize(data: &Json) -> Result<Value> {
    match data {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(Error::Serialization(format!("unrepresentable number {n}")))
            }
        }
        Json::String(s) => Ok(Value::Str(s.clone())),
        Json::Array(items) => Ok(Value::List(
            items.iter().map(deserialize).collect::<Result<Vec<_>>>()?,
        )),
        Json::Object(object) => deserialize_tagged(object),
    }
}

fn deserialize_tagged(object: &Map<String, Json>) -> Result<Value> {
    let tag = object
        .get(ID_KEY)
        .and_then(Json::as_i64)
        .ok_or_else(|| Error::Serialization("missing or non-integer type tag".into()))?;
    match tag {
        TAG_TUPLE => Ok(Value::Tuple(value_list(object, "v")?)),
        TAG_SET => Ok(Value::Set(value_list(object, "k")?)),
        TAG_FROZEN_SET => Ok(Value::FrozenSet(value_list(object, "k")?)),
        TAG_DICT => {
            let mut pairs = Vec::new();
            for item in value_list(object, "i")? {
                match item {
                    Value::Tuple(mut kv) if kv.len() == 2 => {
                        let value = kv.pop().expect("length checked");
                        let key = kv.pop().expect("length checked");
                        pairs.push((key, value));
                    }
                    other => return Err(type_error("key/value pair", &other)),
                }
            }
            Ok(Value::Dict(pairs))
        }
        TAG_BYTES => Ok(Value::Bytes(bytes_field(object, "v")?)),
        TAG_BYTE_ARRAY => Ok(Value::ByteArray(bytes_field(object, "v")?)),
        TAG_RANGE => Ok(Value::Range {
            begin: int_field(object, "b")?,
            end: int_field(object, "e")?,
            step: int_field(object, "s")?,
        }),
        TAG_ELLIPSIS => Ok(Value::Ellipsis),
        TAG_MIXER => deserialize_mixer(object),
        TAG_HASHER => Ok(Value::Hasher(deserialize_hasher(object)?)),
        TAG_KEY_HASHER => {
            let elements = hash_element_list(object)?;
            if elements.is_empty() {
                return Err(Error::Serialization("key hasher without elements".into()));
            }
            Ok(Value::KeyHasher(KeyHasher::new(elements)))
        }
        100 => Ok(Value::Hash(wire(Hash::shake128(digest_size_field(object)?))?)),
        101 => Ok(Value::Hash(wire(Hash::shake256(digest_size_field(object)?))?)),
        110 => {
            let (salt, n, r) = scrypt_cost_fields(object)?;
            Ok(Value::Hash(wire(Hash::scrypt_var(digest_size_field(object)?, salt, n, r))?))
        }
        310 => Ok(Value::Hash(Hash::Sha3_224)),
        311 => Ok(Value::Hash(Hash::Sha3_256)),
        312 => Ok(Value::Hash(Hash::Sha3_384)),
        313 => Ok(Value::Hash(Hash::Sha3_512)),
        320 => Ok(Value::Hash(Hash::Blake2b512)),
        400 => {
            let (salt, n, r) = scrypt_cost_fields(object)?;
            Ok(Value::Hash(wire(Hash::scrypt128(salt, n, r))?))
        }
        401 => {
            let (salt, n, r) = scrypt_cost_fields(object)?;
            Ok(Value::Hash(wire(Hash::scrypt256(salt, n, r))?))
        }
        402 => {
            let (salt, n, r) = scrypt_cost_fields(object)?;
            Ok(Value::Hash(wire(Hash::scrypt512(salt, n, r))?))
        }
        1000 => deserialize_cipher(object, CipherKind::Aes256Ctr),
        1010 => deserialize_cipher(object, CipherKind::ChaCha20),
        1020 => deserialize_cipher(object, CipherKind::Camellia256Ctr),
        unknown => Err(Error::Serialization(format!("unknown algorithm id {unknown}"))),
    }
}

fn deserialize_cipher(object: &Map<String, Json>, kind: CipherKind) -> Result<Value> {
    let mut cipher = Cipher::encryptor(kind);
    if let Some(iv_data) = object.get("iv") {
        let iv = match deserialize(iv_data)? {
            Value::Bytes(iv) => iv,
            other => return Err(type_error("iv bytes", &other)),
        };
        if iv.len() != kind.iv_size() {
            return Err(Error::Serialization("cipher iv size mismatch".into()));
        }
        cipher.set_iv(iv);
    }
    Ok(Value::Cipher(cipher))
}

fn deserialize_mixer(object: &Map<String, Json>) -> Result<Value> {
    let mut elements = Vec::new();
    for item in value_list(object, "elements")? {
        match item {
            Value::Cipher(cipher) => elements.push(cipher),
            other => return Err(type_error("cipher element", &other)),
        }
    }
    if elements.is_empty() {
        return Err(Error::Serialization("mixer without elements".into()));
    }
    Ok(Value::Mixer(Mixer::new(elements)))
}

fn deserialize_hasher(object: &Map<String, Json>) -> Result<Hasher> {
    let elements = hash_element_list(object)?;
    let iterations = int_field(object, "iterations")?;
    let Ok(iterations) = u32::try_from(iterations) else {
        return Err(Error::Serialization("hasher iterations out of range".into()));
    };
    if elements.is_empty() || iterations < 1 {
        return Err(Error::Serialization("malformed hasher wrapper".into()));
    }
    Ok(Hasher::new(elements, iterations))
}

fn hash_element_list(object: &Map<String, Json>) -> Result<Vec<HashElement>> {
    let mut elements = Vec::new();
    for item in value_list(object, "elements")? {
        match item {
            Value::Hash(hash) => elements.push(HashElement::Hash(hash)),
            Value::Hasher(hasher) => elements.push(HashElement::Hasher(hasher)),
            other => return Err(type_error("hash element", &other)),
        }
    }
    Ok(elements)
}

fn value_list(object: &Map<String, Json>, field: &str) -> Result<Vec<Value>> {
    let items = object
        .get(field)
        .and_then(Json::as_array)
        .ok_or_else(|| Error::Serialization(format!("missing list field '{field}'")))?;
    items.iter().map(deserialize).collect()
}

fn bytes_field(object: &Map<String, Json>, field: &str) -> Result<Vec<u8>> {
    let encoded = object
        .get(field)
        .and_then(Json::as_str)
        .ok_or_else(|| Error::Serialization(format!("missing bytes field '{field}'")))?;
    decode_base64(encoded).map_err(|_| Error::Serialization("malformed bytes wrapper".into()))
}

fn int_field(object: &Map<String, Json>, field: &str) -> Result<i64> {
    object
        .get(field)
        .and_then(Json::as_i64)
        .ok_or_else(|| Error::Serialization(format!("missing integer field '{field}'")))
}

fn digest_size_field(object: &Map<String, Json>) -> Result<usize> {
    let digest_size = int_field(object, "digest_size")?;
    usize::try_from(digest_size)
        .map_err(|_| Error::Serialization("negative digest size".into()))
}

fn scrypt_cost_fields(object: &Map<String, Json>) -> Result<(Vec<u8>, u64, u32)> {
    let salt = bytes_field(object, "salt")?;
    let n = int_field(object, "n")?;
    let r = int_field(object, "r")?;
    let n = u64::try_from(n).map_err(|_| Error::Serialization("negative scrypt n".into()))?;
    let r = u32::try_from(r).map_err(|_| Error::Serialization("negative scrypt r".into()))?;
    Ok((salt, n, r))
}

/// Parameter failures on wire-sourced values are serialization errors.
fn wire(result: Result<Hash>) -> Result<Hash> {
    result.map_err(|e| Error::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::random_bytes;

    fn check_roundtrip(value: Value) {
        assert_eq!(deserialize(&serialize(&value)).unwrap(), value);
    }

    #[test]
    fn test_builtin_roundtrips() {
        check_roundtrip(Value::Null);
        check_roundtrip(Value::Bool(true));
        check_roundtrip(Value::Int(-42));
        check_roundtrip(Value::Float(1.5));
        check_roundtrip(Value::Str("secret".into()));
        check_roundtrip(Value::List(vec![Value::Int(1), Value::Str("x".into()), Value::Null]));
        check_roundtrip(Value::Tuple(vec![Value::Int(1), Value::Bool(false)]));
        check_roundtrip(Value::Set(vec![Value::Int(3), Value::Int(5)]));
        check_roundtrip(Value::FrozenSet(vec![Value::Str("a".into())]));
        check_roundtrip(Value::Bytes(random_bytes(33)));
        check_roundtrip(Value::ByteArray(random_bytes(7)));
        check_roundtrip(Value::Range { begin: 0, end: 10, step: 2 });
        check_roundtrip(Value::Ellipsis);
    }

    #[test]
    fn test_dict_roundtrip() {
        check_roundtrip(Value::Dict(vec![
            (Value::Str("login".into()), Value::Str("login".into())),
            (Value::Str("count".into()), Value::Int(3)),
            (Value::Int(7), Value::List(vec![Value::Null])),
        ]));
    }

    #[test]
    fn test_nested_containers_roundtrip() {
        check_roundtrip(Value::Tuple(vec![
            Value::List(vec![Value::Tuple(vec![Value::Bytes(vec![1, 2, 3])])]),
            Value::Dict(vec![(Value::Str("k".into()), Value::Tuple(vec![Value::Int(1)]))]),
        ]));
    }

    #[test]
    fn test_hash_roundtrips() {
        check_roundtrip(Value::Hash(Hash::Sha3_224));
        check_roundtrip(Value::Hash(Hash::Sha3_512));
        check_roundtrip(Value::Hash(Hash::Blake2b512));
        check_roundtrip(Value::Hash(Hash::shake128(16).unwrap()));
        check_roundtrip(Value::Hash(Hash::shake256(64).unwrap()));
        check_roundtrip(Value::Hash(Hash::scrypt256(random_bytes(16), 1 << 14, 8).unwrap()));
        check_roundtrip(Value::Hash(
            Hash::scrypt_var(24, random_bytes(20), 1 << 15, 4).unwrap(),
        ));
    }

    #[test]
    fn test_cipher_key_never_serialized() {
        let mut cipher = Cipher::encryptor(CipherKind::Aes256Ctr);
        cipher.set_key(random_bytes(32));
        cipher.set_iv(random_bytes(16));
        let tree = serialize_cipher(&cipher);
        assert!(tree.get("key").is_none());
        assert!(tree.get("iv").is_some());

        let restored = match deserialize(&tree).unwrap() {
            Value::Cipher(c) => c,
            other => panic!("unexpected value {other:?}"),
        };
        assert!(restored.key().is_none());
        assert_eq!(restored.iv(), cipher.iv());

        // reinjecting the key restores identical behavior
        let mut restored = restored;
        restored.set_key(cipher.key().unwrap().to_vec());
        let data = random_bytes(1024);
        assert_eq!(restored.process(&data).unwrap(), cipher.process(&data).unwrap());
    }

    #[test]
    fn test_mixer_roundtrip_behavior() {
        let elements = vec![
            Cipher::encryptor(CipherKind::ChaCha20),
            Cipher::encryptor(CipherKind::Aes256Ctr),
            Cipher::encryptor(CipherKind::Camellia256Ctr),
        ];
        let mut mixer = crate::crypto::mixer::Mixer::new(elements);
        let keys: Vec<Vec<u8>> = mixer.key_sizes().into_iter().map(random_bytes).collect();
        mixer.set_keys(keys.clone());
        mixer.iv_set_random();
        let data = random_bytes(1024);
        let crypted = mixer.process(&data).unwrap();

        let tree = serialize_mixer(&mixer);
        assert!(!tree.to_string().contains("\"key\""));
        let mut restored = deserialize(&tree).unwrap().into_mixer().unwrap();
        restored.set_keys(keys);
        assert_eq!(restored.process(&data).unwrap(), crypted);
    }

    #[test]
    fn test_hasher_roundtrip_behavior() {
        let hasher = Hasher::new(
            vec![
                Hash::Sha3_256.into(),
                Hash::Blake2b512.into(),
                Hasher::new(vec![Hash::shake256(32).unwrap().into()], 3).into(),
            ],
            2,
        );
        let restored = deserialize(&serialize_hasher(&hasher)).unwrap().into_hasher().unwrap();
        assert_eq!(restored, hasher);
        let data = random_bytes(1024);
        assert_eq!(restored.process(&data).unwrap(), hasher.process(&data).unwrap());
    }

    #[test]
    fn test_key_hasher_roundtrip_behavior() {
        let key_hasher = KeyHasher::new(vec![
            Hash::Sha3_256.into(),
            Hasher::new(
                vec![
                    Hash::shake256(32).unwrap().into(),
                    Hash::scrypt256(random_bytes(16), 1 << 14, 8).unwrap().into(),
                ],
                1,
            )
            .into(),
        ]);
        let restored = deserialize(&serialize_key_hasher(&key_hasher))
            .unwrap()
            .into_key_hasher()
            .unwrap();
        assert_eq!(restored, key_hasher);
        let password = random_bytes(64);
        assert_eq!(restored.process(&password).unwrap(), key_hasher.process(&password).unwrap());
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let data = serde_json::json!({"$$": 9999});
        assert!(matches!(deserialize(&data), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_missing_tag_rejected() {
        let data = serde_json::json!({"v": [1, 2]});
        assert!(matches!(deserialize(&data), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_malformed_wrapper_rejected() {
        let data = serde_json::json!({"$$": -11, "v": "not@@base64"});
        assert!(deserialize(&data).is_err());
        let data = serde_json::json!({"$$": -13, "b": 0, "e": "x", "s": 1});
        assert!(deserialize(&data).is_err());
        let data = serde_json::json!({"$$": 2001, "elements": [], "iterations": 1});
        assert!(deserialize(&data).is_err());
    }
}
