// Stablescope — ERC-20 read calls
// Calldata for the view functions the reader uses, and decoders for what they return.

use stablescope_core::primitives::{hex_decode, keccak256, parse_hex_u128};
use stablescope_core::{EngineError, EngineResult};

const WORD: usize = 32;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Erc20Call<'a> {
    BalanceOf(&'a [u8; 20]),
    TotalSupply,
    Name,
    Symbol,
    Decimals,
}

impl Erc20Call<'_> {
    pub(crate) fn signature(&self) -> &'static str {
        match self {
            Erc20Call::BalanceOf(_) => "balanceOf(address)",
            Erc20Call::TotalSupply => "totalSupply()",
            Erc20Call::Name => "name()",
            Erc20Call::Symbol => "symbol()",
            Erc20Call::Decimals => "decimals()",
        }
    }

    /// Selector followed by the 32-byte argument words.
    pub(crate) fn calldata(&self) -> Vec<u8> {
        let mut data = keccak256(self.signature().as_bytes())[..4].to_vec();
        if let Erc20Call::BalanceOf(holder) = self {
            data.extend_from_slice(&[0u8; WORD - 20]);
            data.extend_from_slice(&holder[..]);
        }
        data
    }
}

pub(crate) fn decode_uint(hex_data: &str) -> EngineResult<u128> {
    parse_hex_u128(hex_data)
}

fn word_len(word: &[u8]) -> usize {
    word[WORD - 8..WORD].iter().fold(0usize, |acc, &b| (acc << 8) | usize::from(b))
}

fn utf8(bytes: Vec<u8>) -> EngineResult<String> {
    String::from_utf8(bytes).map_err(|_| EngineError::decode("abi string", "not UTF-8"))
}

/// `string` return values. Older tokens return `bytes32`; that form is read
/// with its zero padding dropped.
pub(crate) fn decode_abi_string(hex_data: &str) -> EngineResult<String> {
    let bytes = hex_decode(hex_data)?;
    let padded_bytes32 = |word: &[u8]| utf8(word.iter().copied().filter(|&b| b != 0).collect());
    if bytes.len() < 2 * WORD {
        return padded_bytes32(&bytes);
    }

    let offset = word_len(&bytes[..WORD]);
    let Some(len_word) = offset.checked_add(WORD).and_then(|end| bytes.get(offset..end)) else {
        return padded_bytes32(&bytes[..WORD]);
    };
    let start = offset + WORD;
    let text = start
        .checked_add(word_len(len_word))
        .and_then(|end| bytes.get(start..end))
        .ok_or_else(|| EngineError::decode("abi string", "length exceeds response"))?;
    utf8(text.to_vec())
}
