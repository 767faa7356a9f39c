//! Hash primitives wrapping the RustCrypto implementations.
//!
//! Every primitive carries a stable algorithm ID used by the serialization
//! layer: 100-299 for variable-digest hashes, 300-999 for fixed-digest ones.

use blake2::Blake2b512;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::{Digest, Sha3_224, Sha3_256, Sha3_384, Sha3_512, Shake128, Shake256};

use crate::error::{Error, Result};

/// Scrypt cost parameters shared by the fixed and variable digest variants.
///
/// The `salt` is a regular serialized parameter; unlike cipher keys it is
/// not secret and travels with the algorithm tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScryptCost {
    salt: Vec<u8>,
    n: u64,
    r: u32,
}

impl ScryptCost {
    pub fn new(salt: Vec<u8>, n: u64, r: u32) -> Result<Self> {
        if salt.len() < 16 {
            return Err(Error::Parameter("scrypt salt should be >= 16 bytes".into()));
        }
        if n < (1 << 14) || !n.is_power_of_two() {
            return Err(Error::Parameter("scrypt n should be a power of two >= 2^14".into()));
        }
        if r == 0 {
            return Err(Error::Parameter("scrypt r should be positive".into()));
        }
        Ok(Self { salt, n, r })
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn r(&self) -> u32 {
        self.r
    }

    fn derive(&self, data: &[u8], digest_size: usize) -> Result<Vec<u8>> {
        let log_n = self.n.trailing_zeros() as u8;
        let params = scrypt::Params::new(log_n, self.r, 1, digest_size)
            .map_err(|e| Error::Parameter(format!("scrypt parameters rejected: {e}")))?;
        let mut out = vec![0u8; digest_size];
        scrypt::scrypt(data, &self.salt, &params, &mut out)
            .map_err(|e| Error::Parameter(format!("scrypt digest size rejected: {e}")))?;
        Ok(out)
    }
}

/// A concrete hash algorithm with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hash {
    Shake128 { digest_size: usize },
    Shake256 { digest_size: usize },
    ScryptVar { digest_size: usize, cost: ScryptCost },
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
    Blake2b512,
    Scrypt128(ScryptCost),
    Scrypt256(ScryptCost),
    Scrypt512(ScryptCost),
}

impl Hash {
    pub fn shake128(digest_size: usize) -> Result<Self> {
        Self::check_digest_size(digest_size)?;
        Ok(Hash::Shake128 { digest_size })
    }

    pub fn shake256(digest_size: usize) -> Result<Self> {
        Self::check_digest_size(digest_size)?;
        Ok(Hash::Shake256 { digest_size })
    }

    pub fn scrypt_var(digest_size: usize, salt: Vec<u8>, n: u64, r: u32) -> Result<Self> {
        Self::check_digest_size(digest_size)?;
        Ok(Hash::ScryptVar { digest_size, cost: ScryptCost::new(salt, n, r)? })
    }

    pub fn scrypt128(salt: Vec<u8>, n: u64, r: u32) -> Result<Self> {
        Ok(Hash::Scrypt128(ScryptCost::new(salt, n, r)?))
    }

    pub fn scrypt256(salt: Vec<u8>, n: u64, r: u32) -> Result<Self> {
        Ok(Hash::Scrypt256(ScryptCost::new(salt, n, r)?))
    }

    pub fn scrypt512(salt: Vec<u8>, n: u64, r: u32) -> Result<Self> {
        Ok(Hash::Scrypt512(ScryptCost::new(salt, n, r)?))
    }

    fn check_digest_size(digest_size: usize) -> Result<()> {
        if digest_size == 0 {
            return Err(Error::Parameter("digest size should be positive".into()));
        }
        Ok(())
    }

    /// Stable identifier persisted in serialized algorithm trees.
    pub fn algorithm_id(&self) -> i64 {
        match self {
            Hash::Shake128 { .. } => 100,
            Hash::Shake256 { .. } => 101,
            Hash::ScryptVar { .. } => 110,
            Hash::Sha3_224 => 310,
            Hash::Sha3_256 => 311,
            Hash::Sha3_384 => 312,
            Hash::Sha3_512 => 313,
            Hash::Blake2b512 => 320,
            Hash::Scrypt128(_) => 400,
            Hash::Scrypt256(_) => 401,
            Hash::Scrypt512(_) => 402,
        }
    }

    pub fn digest_size(&self) -> usize {
        match self {
            Hash::Shake128 { digest_size }
            | Hash::Shake256 { digest_size }
            | Hash::ScryptVar { digest_size, .. } => *digest_size,
            Hash::Sha3_224 => 28,
            Hash::Sha3_256 => 32,
            Hash::Sha3_384 => 48,
            Hash::Sha3_512 | Hash::Blake2b512 => 64,
            Hash::Scrypt128(_) => 16,
            Hash::Scrypt256(_) => 32,
            Hash::Scrypt512(_) => 64,
        }
    }

    pub fn process(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Hash::Shake128 { digest_size } => {
                let mut hasher = Shake128::default();
                hasher.update(data);
                let mut out = vec![0u8; *digest_size];
                hasher.finalize_xof().read(&mut out);
                Ok(out)
            }
            Hash::Shake256 { digest_size } => {
                let mut hasher = Shake256::default();
                hasher.update(data);
                let mut out = vec![0u8; *digest_size];
                hasher.finalize_xof().read(&mut out);
                Ok(out)
            }
            Hash::ScryptVar { digest_size, cost } => cost.derive(data, *digest_size),
            Hash::Sha3_224 => Ok(Sha3_224::digest(data).to_vec()),
            Hash::Sha3_256 => Ok(Sha3_256::digest(data).to_vec()),
            Hash::Sha3_384 => Ok(Sha3_384::digest(data).to_vec()),
            Hash::Sha3_512 => Ok(Sha3_512::digest(data).to_vec()),
            Hash::Blake2b512 => Ok(Blake2b512::digest(data).to_vec()),
            Hash::Scrypt128(cost) => cost.derive(data, 16),
            Hash::Scrypt256(cost) => cost.derive(data, 32),
            Hash::Scrypt512(cost) => cost.derive(data, 64),
        }
    }
}
