// Core value types for the relay protocol.
//
// These are the small, `Copy` types carried inside packets and shared by both
// sides of the wire: the relay-assigned participant id and the 3D vector used
// for positions and movement deltas. They are plain data; all encoding
// lives in `payload.rs` and `codec.rs`.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use serde::{Deserialize, Serialize};

/// Relay-assigned participant id. Ids start at 1 and only grow; `0` is
/// reserved for a client that has not yet received its `ID_SET`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PlayerId(pub u32);

impl PlayerId {
    /// Provisional id of a local participant before the relay assigns one.
    pub const UNASSIGNED: PlayerId = PlayerId(0);

    /// First id handed out by a fresh relay.
    pub const FIRST: PlayerId = PlayerId(1);

    pub fn is_assigned(self) -> bool {
        self != Self::UNASSIGNED
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A position or a positional delta in world units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Little-endian wire form: three consecutive `f32`s.
    pub fn to_le_bytes(self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&self.x.to_le_bytes());
        out[4..8].copy_from_slice(&self.y.to_le_bytes());
        out[8..12].copy_from_slice(&self.z.to_le_bytes());
        out
    }

    pub fn from_le_bytes(bytes: [u8; 12]) -> Self {
        let f = |i: usize| f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self::new(f(0), f(4), f(8))
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Vec3) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unassigned_is_zero() {
        assert_eq!(PlayerId::UNASSIGNED, PlayerId(0));
        assert!(!PlayerId::UNASSIGNED.is_assigned());
        assert!(PlayerId::FIRST.is_assigned());
    }

    #[test]
    fn vec3_arithmetic() {
        let mut a = Vec3::new(1.0, 2.0, 3.0);
        a += Vec3::new(0.5, -2.0, 1.0);
        assert_eq!(a, Vec3::new(1.5, 0.0, 4.0));
        assert_eq!(a - Vec3::new(1.5, 0.0, 4.0), Vec3::ZERO);
    }

    #[test]
    fn vec3_bytes_are_little_endian_floats() {
        let v = Vec3::new(1.0, -2.5, 1e6);
        let bytes = v.to_le_bytes();
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..8], &(-2.5f32).to_le_bytes());
        assert_eq!(Vec3::from_le_bytes(bytes), v);
    }
}
