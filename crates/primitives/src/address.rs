//! Target addresses.
//!
//! Addresses cross the UI/host boundary and the persistence layer as strings
//! (`"4096"` or `"0x1000"`), never as raw JSON numbers, so that the full
//! unsigned 64-bit range survives peers whose native number type is narrower.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced while parsing primitive values from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
	/// The text is not a decimal or `0x`-prefixed hexadecimal address.
	#[error("invalid address: {0:?}")]
	InvalidAddress(String),
	/// The cell width is not one of 1, 2, 4 or 8 bytes.
	#[error("invalid cell format: {0} (expected 1, 2, 4 or 8)")]
	InvalidFormat(u64),
	/// The endianness name is not `little` or `big`.
	#[error("invalid endianness: {0:?} (expected 'little' or 'big')")]
	InvalidEndian(String),
}

/// An absolute address in the target's memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub u64);

impl Address {
	/// The zero address.
	pub const ZERO: Self = Self(0);

	/// Wraps a raw address value.
	#[must_use]
	pub const fn new(raw: u64) -> Self {
		Self(raw)
	}

	/// Returns the raw address value.
	#[must_use]
	pub const fn get(self) -> u64 {
		self.0
	}

	/// Adds a byte offset, saturating at the top of the address space.
	#[must_use]
	pub const fn saturating_add(self, offset: u64) -> Self {
		Self(self.0.saturating_add(offset))
	}

	/// Adds a byte offset, returning `None` on overflow.
	#[must_use]
	pub fn checked_add(self, offset: u64) -> Option<Self> {
		self.0.checked_add(offset).map(Self)
	}

	/// Returns the distance from `base` to this address, or `None` if this
	/// address lies below `base`.
	#[must_use]
	pub const fn offset_from(self, base: Self) -> Option<u64> {
		self.0.checked_sub(base.0)
	}
}

impl From<u64> for Address {
	fn from(raw: u64) -> Self {
		Self(raw)
	}
}

impl From<Address> for u64 {
	fn from(addr: Address) -> Self {
		addr.0
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:#x}", self.0)
	}
}

impl fmt::LowerHex for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::LowerHex::fmt(&self.0, f)
	}
}

impl FromStr for Address {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let text = s.trim();
		let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
			u64::from_str_radix(hex, 16)
		} else {
			text.parse::<u64>()
		};
		parsed
			.map(Self)
			.map_err(|_| ParseError::InvalidAddress(s.to_string()))
	}
}

impl Serialize for Address {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for Address {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		struct AddressVisitor;

		impl Visitor<'_> for AddressVisitor {
			type Value = Address;

			fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str("a decimal or 0x-prefixed hexadecimal address string")
			}

			fn visit_str<E: de::Error>(self, v: &str) -> Result<Address, E> {
				v.parse().map_err(E::custom)
			}

			// Older blobs stored small addresses as plain numbers.
			fn visit_u64<E: de::Error>(self, v: u64) -> Result<Address, E> {
				Ok(Address(v))
			}
		}

		deserializer.deserialize_any(AddressVisitor)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_decimal_and_hex() {
		assert_eq!("4096".parse::<Address>(), Ok(Address(0x1000)));
		assert_eq!("0x1000".parse::<Address>(), Ok(Address(0x1000)));
		assert_eq!(" 0XfF ".parse::<Address>(), Ok(Address(0xff)));
	}

	#[test]
	fn rejects_garbage() {
		assert!(matches!("".parse::<Address>(), Err(ParseError::InvalidAddress(_))));
		assert!(matches!("0x".parse::<Address>(), Err(ParseError::InvalidAddress(_))));
		assert!(matches!("main+4".parse::<Address>(), Err(ParseError::InvalidAddress(_))));
	}

	#[test]
	fn serializes_full_u64_range_as_string() {
		let json = serde_json::to_string(&Address(u64::MAX)).unwrap();
		assert_eq!(json, "\"0xffffffffffffffff\"");
		let back: Address = serde_json::from_str(&json).unwrap();
		assert_eq!(back, Address(u64::MAX));
	}

	#[test]
	fn accepts_numeric_json() {
		let addr: Address = serde_json::from_str("4096").unwrap();
		assert_eq!(addr, Address(0x1000));
	}

	#[test]
	fn offset_from_base() {
		assert_eq!(Address(0x1010).offset_from(Address(0x1000)), Some(0x10));
		assert_eq!(Address(0x0fff).offset_from(Address(0x1000)), None);
	}
}
