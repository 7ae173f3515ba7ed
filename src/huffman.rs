//! Huffman coding for HPACK string literals.
//!
//! https://httpwg.org/specs/rfc7541.html#huffman.code

use std::sync::OnceLock;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HuffmanError {
    #[error("padding is longer than 7 bits or contains a 0 bit")]
    InvalidPadding,
    #[error("EOS symbol inside a string")]
    UnexpectedEos,
}

/// `(code, bit length)` for symbols 0..=255 plus EOS at 256, in symbol
/// order, straight from RFC 7541 Appendix B.
const CODES: [(u32, u8); 257] = [
    (0x1ff8, 13),
    (0x7f_ffd8, 23),
    (0xfff_ffe2, 28),
    (0xfff_ffe3, 28),
    (0xfff_ffe4, 28),
    (0xfff_ffe5, 28),
    (0xfff_ffe6, 28),
    (0xfff_ffe7, 28),
    (0xfff_ffe8, 28),
    (0xff_ffea, 24),
    (0x3fff_fffc, 30),
    (0xfff_ffe9, 28),
    (0xfff_ffea, 28),
    (0x3fff_fffd, 30),
    (0xfff_ffeb, 28),
    (0xfff_ffec, 28),
    (0xfff_ffed, 28),
    (0xfff_ffee, 28),
    (0xfff_ffef, 28),
    (0xfff_fff0, 28),
    (0xfff_fff1, 28),
    (0xfff_fff2, 28),
    (0x3fff_fffe, 30),
    (0xfff_fff3, 28),
    (0xfff_fff4, 28),
    (0xfff_fff5, 28),
    (0xfff_fff6, 28),
    (0xfff_fff7, 28),
    (0xfff_fff8, 28),
    (0xfff_fff9, 28),
    (0xfff_fffa, 28),
    (0xfff_fffb, 28),
    (0x14, 6),
    (0x3f8, 10),
    (0x3f9, 10),
    (0xffa, 12),
    (0x1ff9, 13),
    (0x15, 6),
    (0xf8, 8),
    (0x7fa, 11),
    (0x3fa, 10),
    (0x3fb, 10),
    (0xf9, 8),
    (0x7fb, 11),
    (0xfa, 8),
    (0x16, 6),
    (0x17, 6),
    (0x18, 6),
    (0x0, 5),
    (0x1, 5),
    (0x2, 5),
    (0x19, 6),
    (0x1a, 6),
    (0x1b, 6),
    (0x1c, 6),
    (0x1d, 6),
    (0x1e, 6),
    (0x1f, 6),
    (0x5c, 7),
    (0xfb, 8),
    (0x7ffc, 15),
    (0x20, 6),
    (0xffb, 12),
    (0x3fc, 10),
    (0x1ffa, 13),
    (0x21, 6),
    (0x5d, 7),
    (0x5e, 7),
    (0x5f, 7),
    (0x60, 7),
    (0x61, 7),
    (0x62, 7),
    (0x63, 7),
    (0x64, 7),
    (0x65, 7),
    (0x66, 7),
    (0x67, 7),
    (0x68, 7),
    (0x69, 7),
    (0x6a, 7),
    (0x6b, 7),
    (0x6c, 7),
    (0x6d, 7),
    (0x6e, 7),
    (0x6f, 7),
    (0x70, 7),
    (0x71, 7),
    (0x72, 7),
    (0xfc, 8),
    (0x73, 7),
    (0xfd, 8),
    (0x1ffb, 13),
    (0x7_fff0, 19),
    (0x1ffc, 13),
    (0x3ffc, 14),
    (0x22, 6),
    (0x7ffd, 15),
    (0x3, 5),
    (0x23, 6),
    (0x4, 5),
    (0x24, 6),
    (0x5, 5),
    (0x25, 6),
    (0x26, 6),
    (0x27, 6),
    (0x6, 5),
    (0x74, 7),
    (0x75, 7),
    (0x28, 6),
    (0x29, 6),
    (0x2a, 6),
    (0x7, 5),
    (0x2b, 6),
    (0x76, 7),
    (0x2c, 6),
    (0x8, 5),
    (0x9, 5),
    (0x2d, 6),
    (0x77, 7),
    (0x78, 7),
    (0x79, 7),
    (0x7a, 7),
    (0x7b, 7),
    (0x7ffe, 15),
    (0x7fc, 11),
    (0x3ffd, 14),
    (0x1ffd, 13),
    (0xfff_fffc, 28),
    (0xf_ffe6, 20),
    (0x3f_ffd2, 22),
    (0xf_ffe7, 20),
    (0xf_ffe8, 20),
    (0x3f_ffd3, 22),
    (0x3f_ffd4, 22),
    (0x3f_ffd5, 22),
    (0x7f_ffd9, 23),
    (0x3f_ffd6, 22),
    (0x7f_ffda, 23),
    (0x7f_ffdb, 23),
    (0x7f_ffdc, 23),
    (0x7f_ffdd, 23),
    (0x7f_ffde, 23),
    (0xff_ffeb, 24),
    (0x7f_ffdf, 23),
    (0xff_ffec, 24),
    (0xff_ffed, 24),
    (0x3f_ffd7, 22),
    (0x7f_ffe0, 23),
    (0xff_ffee, 24),
    (0x7f_ffe1, 23),
    (0x7f_ffe2, 23),
    (0x7f_ffe3, 23),
    (0x7f_ffe4, 23),
    (0x1f_ffdc, 21),
    (0x3f_ffd8, 22),
    (0x7f_ffe5, 23),
    (0x3f_ffd9, 22),
    (0x7f_ffe6, 23),
    (0x7f_ffe7, 23),
    (0xff_ffef, 24),
    (0x3f_ffda, 22),
    (0x1f_ffdd, 21),
    (0xf_ffe9, 20),
    (0x3f_ffdb, 22),
    (0x3f_ffdc, 22),
    (0x7f_ffe8, 23),
    (0x7f_ffe9, 23),
    (0x1f_ffde, 21),
    (0x7f_ffea, 23),
    (0x3f_ffdd, 22),
    (0x3f_ffde, 22),
    (0xff_fff0, 24),
    (0x1f_ffdf, 21),
    (0x3f_ffdf, 22),
    (0x7f_ffeb, 23),
    (0x7f_ffec, 23),
    (0x1f_ffe0, 21),
    (0x1f_ffe1, 21),
    (0x3f_ffe0, 22),
    (0x1f_ffe2, 21),
    (0x7f_ffed, 23),
    (0x3f_ffe1, 22),
    (0x7f_ffee, 23),
    (0x7f_ffef, 23),
    (0xf_ffea, 20),
    (0x3f_ffe2, 22),
    (0x3f_ffe3, 22),
    (0x3f_ffe4, 22),
    (0x7f_fff0, 23),
    (0x3f_ffe5, 22),
    (0x3f_ffe6, 22),
    (0x7f_fff1, 23),
    (0x3ff_ffe0, 26),
    (0x3ff_ffe1, 26),
    (0xf_ffeb, 20),
    (0x7_fff1, 19),
    (0x3f_ffe7, 22),
    (0x7f_fff2, 23),
    (0x3f_ffe8, 22),
    (0x1ff_ffec, 25),
    (0x3ff_ffe2, 26),
    (0x3ff_ffe3, 26),
    (0x3ff_ffe4, 26),
    (0x7ff_ffde, 27),
    (0x7ff_ffdf, 27),
    (0x3ff_ffe5, 26),
    (0xff_fff1, 24),
    (0x1ff_ffed, 25),
    (0x7_fff2, 19),
    (0x1f_ffe3, 21),
    (0x3ff_ffe6, 26),
    (0x7ff_ffe0, 27),
    (0x7ff_ffe1, 27),
    (0x3ff_ffe7, 26),
    (0x7ff_ffe2, 27),
    (0xff_fff2, 24),
    (0x1f_ffe4, 21),
    (0x1f_ffe5, 21),
    (0x3ff_ffe8, 26),
    (0x3ff_ffe9, 26),
    (0xfff_fffd, 28),
    (0x7ff_ffe3, 27),
    (0x7ff_ffe4, 27),
    (0x7ff_ffe5, 27),
    (0xf_ffec, 20),
    (0xff_fff3, 24),
    (0xf_ffed, 20),
    (0x1f_ffe6, 21),
    (0x3f_ffe9, 22),
    (0x1f_ffe7, 21),
    (0x1f_ffe8, 21),
    (0x7f_fff3, 23),
    (0x3f_ffea, 22),
    (0x3f_ffeb, 22),
    (0x1ff_ffee, 25),
    (0x1ff_ffef, 25),
    (0xff_fff4, 24),
    (0xff_fff5, 24),
    (0x3ff_ffea, 26),
    (0x7f_fff4, 23),
    (0x3ff_ffeb, 26),
    (0x7ff_ffe6, 27),
    (0x3ff_ffec, 26),
    (0x3ff_ffed, 26),
    (0x7ff_ffe7, 27),
    (0x7ff_ffe8, 27),
    (0x7ff_ffe9, 27),
    (0x7ff_ffea, 27),
    (0x7ff_ffeb, 27),
    (0xfff_fffe, 28),
    (0x7ff_ffec, 27),
    (0x7ff_ffed, 27),
    (0x7ff_ffee, 27),
    (0x7ff_ffef, 27),
    (0x7ff_fff0, 27),
    (0x3ff_ffee, 26),
    (0x3fff_ffff, 30),
];

const EOS: u16 = 256;

/// Number of octets `input` occupies once Huffman coded.
#[must_use]
pub fn encoded_len(input: &[u8]) -> usize {
    let bits: usize = input.iter().map(|&b| CODES[b as usize].1 as usize).sum();
    (bits + 7) / 8
}

/// Appends the Huffman coding of `input`, padded with the EOS prefix.
pub fn encode(input: &[u8], out: &mut Vec<u8>) {
    let mut acc: u64 = 0;
    let mut acc_bits: u8 = 0;
    for &byte in input {
        let (code, bits) = CODES[byte as usize];
        acc = (acc << bits) | u64::from(code);
        acc_bits += bits;
        while acc_bits >= 8 {
            acc_bits -= 8;
            out.push((acc >> acc_bits) as u8);
        }
    }
    if acc_bits > 0 {
        // pad the final octet with the most significant bits of EOS
        let pad = 8 - acc_bits;
        out.push(((acc << pad) as u8) | ((1u8 << pad) - 1));
    }
}

/// Binary trie over the code table; `symbol` is set on leaves.
struct Node {
    children: [u16; 2],
    symbol: Option<u16>,
}

const NO_CHILD: u16 = u16::MAX;

fn trie() -> &'static Vec<Node> {
    static TRIE: OnceLock<Vec<Node>> = OnceLock::new();
    TRIE.get_or_init(|| {
        let mut nodes = vec![Node {
            children: [NO_CHILD; 2],
            symbol: None,
        }];
        for (symbol, &(code, bits)) in CODES.iter().enumerate() {
            let mut at = 0usize;
            for shift in (0..bits).rev() {
                let bit = ((code >> shift) & 1) as usize;
                if nodes[at].children[bit] == NO_CHILD {
                    nodes.push(Node {
                        children: [NO_CHILD; 2],
                        symbol: None,
                    });
                    let next = (nodes.len() - 1) as u16;
                    nodes[at].children[bit] = next;
                }
                at = nodes[at].children[bit] as usize;
            }
            nodes[at].symbol = Some(symbol as u16);
        }
        nodes
    })
}

/// Decodes a Huffman-coded string. Up to 7 bits of all-ones padding are
/// accepted; anything longer, any 0 bit in the padding, or a decoded EOS
/// is an error.
pub fn decode(input: &[u8]) -> Result<Vec<u8>, HuffmanError> {
    let nodes = trie();
    let mut out = Vec::with_capacity(input.len() * 2);
    let mut at = 0usize;
    let mut path_bits: u8 = 0;
    let mut path_all_ones = true;
    for &byte in input {
        for shift in (0..8).rev() {
            let bit = usize::from((byte >> shift) & 1);
            let next = nodes[at].children[bit];
            if next == NO_CHILD {
                return Err(HuffmanError::InvalidPadding);
            }
            at = next as usize;
            path_bits += 1;
            path_all_ones &= bit == 1;
            if let Some(symbol) = nodes[at].symbol {
                if symbol == EOS {
                    return Err(HuffmanError::UnexpectedEos);
                }
                out.push(symbol as u8);
                at = 0;
                path_bits = 0;
                path_all_ones = true;
            }
        }
    }
    if path_bits > 7 || !path_all_ones {
        return Err(HuffmanError::InvalidPadding);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(input: &[u8]) -> Vec<u8> {
        let mut encoded = Vec::new();
        encode(input, &mut encoded);
        assert_eq!(encoded.len(), encoded_len(input));
        decode(&encoded).expect("decode")
    }

    #[test]
    fn rfc7541_examples_produce_exact_bytes() {
        let mut encoded = Vec::new();
        encode(b"www.example.com", &mut encoded);
        assert_eq!(
            encoded,
            [0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff]
        );

        encoded.clear();
        encode(b"no-cache", &mut encoded);
        assert_eq!(encoded, [0xa8, 0xeb, 0x10, 0x64, 0x9c, 0xbf]);

        encoded.clear();
        encode(b"custom-key", &mut encoded);
        assert_eq!(encoded, [0x25, 0xa8, 0x49, 0xe9, 0x5b, 0xa9, 0x7d, 0x7f]);
    }

    #[test]
    fn printable_ascii_round_trips() {
        let all: Vec<u8> = (0x20..=0x7e).collect();
        assert_eq!(roundtrip(&all), all);
    }

    #[test]
    fn every_octet_round_trips() {
        let all: Vec<u8> = (0..=255).collect();
        assert_eq!(roundtrip(&all), all);
    }

    #[test]
    fn empty_string_round_trips() {
        assert_eq!(roundtrip(b""), b"");
    }

    #[test]
    fn zero_bit_in_padding_is_rejected() {
        // 'a' is 00011 (5 bits); pad with 010 instead of 111
        let encoded = [0b0001_1010];
        assert_eq!(decode(&encoded), Err(HuffmanError::InvalidPadding));
    }

    #[test]
    fn overlong_padding_is_rejected() {
        // a full octet of 1s after a complete symbol is an EOS prefix
        // longer than 7 bits
        let mut encoded = Vec::new();
        encode(b"0", &mut encoded);
        encoded.push(0xff);
        assert_eq!(decode(&encoded), Err(HuffmanError::InvalidPadding));
    }
}
