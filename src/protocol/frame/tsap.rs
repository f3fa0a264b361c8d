use super::{
    super::error::{Error as S7Error, Result as S7Result},
    CpuType,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Transport service access point, `(high byte, low byte)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tsap(pub u8, pub u8);

impl Tsap {
    #[inline]
    pub fn high(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn low(&self) -> u8 {
        self.1
    }
}

impl From<Tsap> for u16 {
    #[inline]
    fn from(tsap: Tsap) -> Self {
        u16::from_be_bytes([tsap.0, tsap.1])
    }
}

impl From<u16> for Tsap {
    #[inline]
    fn from(value: u16) -> Self {
        let [h, l] = value.to_be_bytes();
        Tsap(h, l)
    }
}

fn parse_hex_u8(s: &str) -> S7Result<u8> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(digits, 16).map_err(|_| S7Error::InvalidConfiguration("tsap"))
}

impl FromStr for Tsap {
    type Err = S7Error;

    /// Accepts `"HH:LL"` hex bytes, `"0xHHLL"` or a decimal u16.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((h, l)) = s.split_once(':') {
            return Ok(Tsap(parse_hex_u8(h)?, parse_hex_u8(l)?));
        }
        let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u16::from_str_radix(hex, 16),
            None => s.parse::<u16>(),
        }
        .map_err(|_| S7Error::InvalidConfiguration("tsap"))?;
        Ok(Tsap::from(value))
    }
}

impl Serialize for Tsap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:02X}:{:02X}", self.0, self.1))
    }
}

impl<'de> Deserialize<'de> for Tsap {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Calling (local) and called (remote) TSAP of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsapPair {
    pub local: Tsap,
    pub remote: Tsap,
}

impl FromStr for TsapPair {
    type Err = S7Error;

    /// `"local/remote"`, e.g. `"01:00/03:01"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (l, r) = s
            .split_once('/')
            .ok_or(S7Error::InvalidConfiguration("tsap"))?;
        Ok(TsapPair {
            local: l.parse()?,
            remote: r.parse()?,
        })
    }
}

/// Default TSAP pair for a device family addressed by rack and slot.
pub fn default_tsap_pair(cpu: CpuType, rack: u8, slot: u8) -> S7Result<TsapPair> {
    if rack > 0x07 {
        return Err(S7Error::InvalidRack(rack));
    }
    if slot > 0x1F {
        return Err(S7Error::InvalidSlot(slot));
    }

    let pair = match cpu {
        CpuType::S7200 => TsapPair {
            local: Tsap(0x10, 0x00),
            remote: Tsap(0x10, 0x01),
        },
        CpuType::Logo0BA8 => TsapPair {
            local: Tsap(0x01, 0x00),
            remote: Tsap(0x01, 0x02),
        },
        // rack in bits 5..7, slot in bits 0..4 of the remote low byte
        CpuType::Any
        | CpuType::S7200Smart
        | CpuType::S7300
        | CpuType::S7400
        | CpuType::S71200
        | CpuType::S71500 => TsapPair {
            local: Tsap(0x01, 0x00),
            remote: Tsap(0x03, (rack << 5) | slot),
        },
    };

    Ok(pair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_forms() {
        assert_eq!("03:01".parse::<Tsap>().unwrap(), Tsap(0x03, 0x01));
        assert_eq!("0x0301".parse::<Tsap>().unwrap(), Tsap(0x03, 0x01));
        assert_eq!("769".parse::<Tsap>().unwrap(), Tsap(0x03, 0x01));
        assert!("zz:01".parse::<Tsap>().is_err());

        let pair: TsapPair = "01:00/03:02".parse().unwrap();
        assert_eq!(u16::from(pair.local), 0x0100);
        assert_eq!(u16::from(pair.remote), 0x0302);
    }

    #[test]
    fn rack_slot_encoding() {
        let pair = default_tsap_pair(CpuType::S71500, 0, 1).unwrap();
        assert_eq!(pair.remote, Tsap(0x03, 0x01));
        let pair = default_tsap_pair(CpuType::S7400, 2, 3).unwrap();
        assert_eq!(pair.remote, Tsap(0x03, 0x43));
        assert!(matches!(
            default_tsap_pair(CpuType::S7300, 8, 0),
            Err(S7Error::InvalidRack(8))
        ));
        assert!(matches!(
            default_tsap_pair(CpuType::S7300, 0, 32),
            Err(S7Error::InvalidSlot(32))
        ));
    }
}
