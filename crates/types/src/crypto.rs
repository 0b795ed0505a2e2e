//! Group elements, scalars and key pairs over Ristretto255.
//!
//! Everything the signing protocol needs from the group lives here: point
//! and scalar arithmetic, the identity element, 32-byte marshaling, and the
//! keyed hash-to-scalar used for challenges.

use crate::Hash;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar as DalekScalar;
use curve25519_dalek::traits::Identity;
use rand::{CryptoRng, RngCore};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// Key-derivation context for the round challenge.
pub const CHALLENGE_CONTEXT: &str = "treesig cosi challenge v1";

/// Key-derivation context for seeded key pairs.
const KEYPAIR_CONTEXT: &str = "treesig keypair v1";

/// An element of the Ristretto255 group.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Point(RistrettoPoint);

impl Point {
    /// Size of the marshaled form.
    pub const BYTES: usize = 32;

    /// The identity ("null") element.
    pub fn identity() -> Self {
        Self(RistrettoPoint::identity())
    }

    /// `scalar · G` for the standard base point.
    pub fn base_mul(scalar: &Scalar) -> Self {
        Self(RistrettoPoint::mul_base(&scalar.0))
    }

    /// Decode a compressed point, rejecting non-canonical encodings.
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        CompressedRistretto(*bytes).decompress().map(Self)
    }

    /// Compressed 32-byte encoding.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }

    pub fn is_identity(&self) -> bool {
        self.0 == RistrettoPoint::identity()
    }

    /// Sum an iterator of points; the empty sum is the identity.
    pub fn sum<'a>(points: impl IntoIterator<Item = &'a Point>) -> Point {
        points.into_iter().fold(Point::identity(), |acc, p| acc + *p)
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::identity()
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point(self.0 + rhs.0)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point(self.0 - rhs.0)
    }
}

impl AddAssign for Point {
    fn add_assign(&mut self, rhs: Point) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Point {
    fn sub_assign(&mut self, rhs: Point) {
        self.0 -= rhs.0;
    }
}

impl Mul<Scalar> for Point {
    type Output = Point;
    fn mul(self, rhs: Scalar) -> Point {
        Point(self.0 * rhs.0)
    }
}

impl fmt::Debug for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Point({})", short_hex(&self.to_bytes()))
    }
}

/// An integer modulo the group order.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Scalar(DalekScalar);

impl Scalar {
    /// Size of the marshaled form.
    pub const BYTES: usize = 32;

    pub const ZERO: Scalar = Scalar(DalekScalar::ZERO);

    /// Uniformly random scalar.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut wide = [0u8; 64];
        rng.fill_bytes(&mut wide);
        Self(DalekScalar::from_bytes_mod_order_wide(&wide))
    }

    /// Decode a canonical 32-byte scalar.
    pub fn from_canonical_bytes(bytes: [u8; 32]) -> Option<Self> {
        let scalar: Option<DalekScalar> = DalekScalar::from_canonical_bytes(bytes).into();
        scalar.map(Self)
    }

    /// Reduce a small integer into the field.
    pub fn from_u64(value: u64) -> Self {
        Self(DalekScalar::from(value))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Derive a scalar from a domain context and a list of byte strings.
    ///
    /// Each part is length-prefixed so distinct part boundaries never
    /// collide. 64 bytes of XOF output are reduced mod the group order.
    pub fn hash_from(context: &str, parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(context);
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        let mut wide = [0u8; 64];
        hasher.finalize_xof().fill(&mut wide);
        Self(DalekScalar::from_bytes_mod_order_wide(&wide))
    }
}

impl Default for Scalar {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for Scalar {
    type Output = Scalar;
    fn add(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 + rhs.0)
    }
}

impl Sub for Scalar {
    type Output = Scalar;
    fn sub(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 - rhs.0)
    }
}

impl Mul for Scalar {
    type Output = Scalar;
    fn mul(self, rhs: Scalar) -> Scalar {
        Scalar(self.0 * rhs.0)
    }
}

impl Neg for Scalar {
    type Output = Scalar;
    fn neg(self) -> Scalar {
        Scalar(-self.0)
    }
}

impl AddAssign for Scalar {
    fn add_assign(&mut self, rhs: Scalar) {
        self.0 += rhs.0;
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scalar({})", short_hex(&self.to_bytes()))
    }
}

/// A node's long-term public key `x · G`.
///
/// Ordered and hashed by its compressed encoding so it can key sets
/// (exception lists are `BTreeSet<PublicKey>`).
#[derive(Clone, Copy)]
pub struct PublicKey {
    point: Point,
    compressed: [u8; 32],
}

impl PublicKey {
    pub fn from_point(point: Point) -> Self {
        Self {
            compressed: point.to_bytes(),
            point,
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        Point::from_bytes(bytes).map(|point| Self {
            point,
            compressed: *bytes,
        })
    }

    pub fn point(&self) -> Point {
        self.point
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.compressed
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.compressed
    }

    /// Sum a set of keys into one aggregate point.
    pub fn aggregate<'a>(keys: impl IntoIterator<Item = &'a PublicKey>) -> Point {
        keys.into_iter()
            .fold(Point::identity(), |acc, key| acc + key.point)
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.compressed == other.compressed
    }
}

impl Eq for PublicKey {}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.compressed.cmp(&other.compressed)
    }
}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.compressed.hash(state);
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", short_hex(&self.compressed))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.compressed))
    }
}

/// A node's long-term secret `x` and public key `x · G`.
#[derive(Clone)]
pub struct KeyPair {
    secret: Scalar,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh random key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_secret(Scalar::random(rng))
    }

    /// Derive a key pair from a seed (for testing/simulation).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_secret(Scalar::hash_from(KEYPAIR_CONTEXT, &[seed]))
    }

    pub fn from_secret(secret: Scalar) -> Self {
        Self {
            public: PublicKey::from_point(Point::base_mul(&secret)),
            secret,
        }
    }

    pub fn secret(&self) -> &Scalar {
        &self.secret
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Round challenge `c = H(V̂ ‖ message ‖ merkle_root?)`.
///
/// The Merkle root is only bound when the proof scheme is in use; the key
/// scheme passes `None`.
pub fn derive_challenge(commitment: &Point, message: &[u8], merkle_root: Option<&Hash>) -> Scalar {
    let point = commitment.to_bytes();
    match merkle_root {
        Some(root) => Scalar::hash_from(CHALLENGE_CONTEXT, &[&point, message, root.as_bytes()]),
        None => Scalar::hash_from(CHALLENGE_CONTEXT, &[&point, message]),
    }
}

fn short_hex(bytes: &[u8; 32]) -> String {
    let hex = hex::encode(bytes);
    format!("{}..{}", &hex[..8], &hex[56..])
}

/// SBOR support for 32-byte group encodings.
///
/// Values travel as a plain `[u8; 32]` array; decoding rejects bytes that
/// are not a canonical encoding.
macro_rules! impl_sbor_bytes32 {
    ($ty:ty, $name:literal, $decode:expr) => {
        impl<E: sbor::Encoder<sbor::NoCustomValueKind>> sbor::Encode<sbor::NoCustomValueKind, E>
            for $ty
        {
            fn encode_value_kind(&self, encoder: &mut E) -> Result<(), sbor::EncodeError> {
                encoder.write_value_kind(sbor::ValueKind::Array)
            }

            fn encode_body(&self, encoder: &mut E) -> Result<(), sbor::EncodeError> {
                let bytes: [u8; 32] = self.to_bytes();
                encoder.encode_deeper_body(&bytes)
            }
        }

        impl<D: sbor::Decoder<sbor::NoCustomValueKind>> sbor::Decode<sbor::NoCustomValueKind, D>
            for $ty
        {
            fn decode_body_with_value_kind(
                decoder: &mut D,
                value_kind: sbor::ValueKind<sbor::NoCustomValueKind>,
            ) -> Result<Self, sbor::DecodeError> {
                let bytes: [u8; 32] = decoder.decode_deeper_body_with_value_kind(value_kind)?;
                let decode: fn([u8; 32]) -> Option<$ty> = $decode;
                decode(bytes).ok_or(sbor::DecodeError::InvalidCustomValue)
            }
        }

        impl sbor::Categorize<sbor::NoCustomValueKind> for $ty {
            fn value_kind() -> sbor::ValueKind<sbor::NoCustomValueKind> {
                sbor::ValueKind::Array
            }
        }

        impl sbor::Describe<sbor::NoCustomTypeKind> for $ty {
            const TYPE_ID: sbor::RustTypeId = sbor::RustTypeId::novel_with_code($name, &[], &[]);

            fn type_data() -> sbor::TypeData<sbor::NoCustomTypeKind, sbor::RustTypeId> {
                sbor::TypeData::unnamed(sbor::TypeKind::Any)
            }
        }
    };
}

impl_sbor_bytes32!(Point, "Point", |bytes| Point::from_bytes(&bytes));
impl_sbor_bytes32!(Scalar, "Scalar", Scalar::from_canonical_bytes);
impl_sbor_bytes32!(PublicKey, "PublicKey", |bytes| PublicKey::from_bytes(&bytes));
