//! Minimal ABI codec for the vault, factory and oracle contracts
//!
//! Only the shapes the keeper touches are supported: static words
//! (uint/int/bool/address), `string` and `address[]` return values.

use crate::error::{Error, Result};
use crate::types::Address;

/// 4-byte function selectors (first bytes of keccak256 of the signature)
pub mod selectors {
    /// `getUserVaults(address)`
    pub const GET_USER_VAULTS: [u8; 4] = [0xe7, 0xf3, 0xc6, 0x9c];
    /// `createVault(uint256,uint256,uint256)`
    pub const CREATE_VAULT: [u8; 4] = [0x29, 0x10, 0xb2, 0x2d];
    /// `getBalance()`
    pub const GET_BALANCE: [u8; 4] = [0x12, 0x06, 0x5f, 0xe0];
    /// `unlockTime()`
    pub const UNLOCK_TIME: [u8; 4] = [0x25, 0x1c, 0x1a, 0xa3];
    /// `creator()`
    pub const CREATOR: [u8; 4] = [0x02, 0xd0, 0x5d, 0x3f];
    /// `targetPrice()`
    pub const TARGET_PRICE: [u8; 4] = [0xdc, 0x38, 0x67, 0x9c];
    /// `getLockStatus()`
    pub const GET_LOCK_STATUS: [u8; 4] = [0x9a, 0xe8, 0xad, 0x45];
    /// `withdraw()`
    pub const WITHDRAW: [u8; 4] = [0x3c, 0xcf, 0xd6, 0x0b];
    /// `deposit()`
    pub const DEPOSIT: [u8; 4] = [0xd0, 0xe3, 0x0d, 0xb0];
    /// `latestRoundData()`
    pub const LATEST_ROUND_DATA: [u8; 4] = [0xfe, 0xaf, 0x96, 0x8c];
}

const WORD: usize = 32;

/// Static call argument
#[derive(Debug, Clone, Copy)]
pub enum Token {
    Address(Address),
    Uint(u128),
    Bool(bool),
}

impl Token {
    fn encode(&self) -> [u8; WORD] {
        let mut word = [0u8; WORD];
        match self {
            Token::Address(a) => word[12..].copy_from_slice(a.as_bytes()),
            Token::Uint(v) => word[16..].copy_from_slice(&v.to_be_bytes()),
            Token::Bool(b) => word[31] = u8::from(*b),
        }
        word
    }
}

/// Encode calldata for a function taking only static arguments
pub fn encode_call(selector: [u8; 4], args: &[Token]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + WORD * args.len());
    data.extend_from_slice(&selector);
    for arg in args {
        data.extend_from_slice(&arg.encode());
    }
    data
}

/// Reader over ABI-encoded return data
pub struct AbiReader<'a> {
    data: &'a [u8],
}

impl<'a> AbiReader<'a> {
    /// Wrap return data; empty data means nothing executed at the address
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::CallException {
                data: Some("0x".to_string()),
            });
        }
        Ok(Self { data })
    }

    /// `len` bytes starting at `start`; offsets come from the node and may overflow
    fn span(&self, start: usize, len: usize) -> Result<&'a [u8]> {
        let end = start
            .checked_add(len)
            .ok_or_else(|| Error::AbiDecode(format!("offset {} + {} overflows", start, len)))?;
        self.data.get(start..end).ok_or_else(|| {
            Error::AbiDecode(format!(
                "return data too short: need {} bytes, have {}",
                end,
                self.data.len()
            ))
        })
    }

    fn word_at(&self, offset: usize) -> Result<&'a [u8]> {
        self.span(offset, WORD)
    }

    fn word(&self, index: usize) -> Result<&'a [u8]> {
        let offset = index
            .checked_mul(WORD)
            .ok_or_else(|| Error::AbiDecode(format!("slot {} out of range", index)))?;
        self.word_at(offset)
    }

    /// `uint256` at slot `index`, rejected if it does not fit in 128 bits
    pub fn uint(&self, index: usize) -> Result<u128> {
        let word = self.word(index)?;
        if word[..16].iter().any(|b| *b != 0) {
            return Err(Error::AbiDecode(format!(
                "uint at slot {} exceeds 128 bits",
                index
            )));
        }
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&word[16..]);
        Ok(u128::from_be_bytes(buf))
    }

    /// `uint` that must fit in 64 bits (timestamps, round ids)
    pub fn uint64(&self, index: usize) -> Result<u64> {
        let value = self.uint(index)?;
        u64::try_from(value)
            .map_err(|_| Error::AbiDecode(format!("uint at slot {} exceeds 64 bits", index)))
    }

    /// `int256` at slot `index`, rejected if it does not fit in 128 bits
    pub fn int(&self, index: usize) -> Result<i128> {
        let word = self.word(index)?;
        let negative = word[0] & 0x80 != 0;
        let fill = if negative { 0xff } else { 0x00 };
        if word[..16].iter().any(|b| *b != fill) {
            return Err(Error::AbiDecode(format!(
                "int at slot {} exceeds 128 bits",
                index
            )));
        }
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&word[16..]);
        let value = i128::from_be_bytes(buf);
        if (value < 0) != negative {
            return Err(Error::AbiDecode(format!(
                "int at slot {} exceeds 128 bits",
                index
            )));
        }
        Ok(value)
    }

    pub fn boolean(&self, index: usize) -> Result<bool> {
        match self.uint(index)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::AbiDecode(format!(
                "invalid bool {} at slot {}",
                other, index
            ))),
        }
    }

    pub fn address(&self, index: usize) -> Result<Address> {
        let word = self.word(index)?;
        if word[..12].iter().any(|b| *b != 0) {
            return Err(Error::AbiDecode(format!(
                "dirty address bits at slot {}",
                index
            )));
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&word[12..]);
        Ok(Address(bytes))
    }

    fn offset(&self, index: usize) -> Result<usize> {
        let offset = self.uint(index)?;
        usize::try_from(offset)
            .map_err(|_| Error::AbiDecode(format!("offset at slot {} too large", index)))
    }

    /// Dynamic `string` whose head sits at slot `index`
    pub fn string(&self, index: usize) -> Result<String> {
        let offset = self.offset(index)?;
        let len = self.length_at(offset)?;
        let start = offset
            .checked_add(WORD)
            .ok_or_else(|| Error::AbiDecode(format!("string at slot {} out of range", index)))?;
        let bytes = self.span(start, len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::AbiDecode(format!("string at slot {}: {}", index, e)))
    }

    /// Dynamic `address[]` whose head sits at slot `index`
    pub fn address_array(&self, index: usize) -> Result<Vec<Address>> {
        let offset = self.offset(index)?;
        let len = self.length_at(offset)?;
        let start = offset
            .checked_add(WORD)
            .ok_or_else(|| Error::AbiDecode(format!("array at slot {} out of range", index)))?;
        let elements = AbiReader {
            data: self.data.get(start..).unwrap_or_default(),
        };
        (0..len).map(|i| elements.address(i)).collect()
    }

    fn length_at(&self, offset: usize) -> Result<usize> {
        let word = self.word_at(offset)?;
        if word[..24].iter().any(|b| *b != 0) {
            return Err(Error::AbiDecode(format!("length at byte {} too large", offset)));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&word[24..]);
        usize::try_from(u64::from_be_bytes(buf))
            .map_err(|_| Error::AbiDecode(format!("length at byte {} too large", offset)))
    }
}

/// Decode a `0x`-prefixed hex string into bytes
pub fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    Ok(hex::decode(stripped)?)
}

/// Encode bytes as `0x`-prefixed hex
pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
