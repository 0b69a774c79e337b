//! GSM 03.38 default alphabet, extension table and septet packing

/// Escape to the extension table
pub const ESCAPE: u8 = 0x1B;

#[rustfmt::skip]
const DEFAULT_ALPHABET: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å',
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1b}', 'Æ', 'æ', 'ß', 'É',
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/',
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?',
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O',
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§',
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à',
];

const EXTENSION: [(u8, char); 10] = [
    (0x0A, '\u{0c}'),
    (0x14, '^'),
    (0x28, '{'),
    (0x29, '}'),
    (0x2F, '\\'),
    (0x3C, '['),
    (0x3D, '~'),
    (0x3E, ']'),
    (0x40, '|'),
    (0x65, '€'),
];

/// One character in septet form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Septet {
    Single(u8),
    /// Escape + extension code; always occupies two septets
    Escaped(u8),
}

impl Septet {
    pub fn width(self) -> usize {
        match self {
            Septet::Single(_) => 1,
            Septet::Escaped(_) => 2,
        }
    }

    fn push_into(self, out: &mut Vec<u8>) {
        match self {
            Septet::Single(code) => out.push(code),
            Septet::Escaped(code) => {
                out.push(ESCAPE);
                out.push(code);
            },
        }
    }
}

/// Map a character onto the default alphabet or the extension table
pub fn encode_char(c: char) -> Option<Septet> {
    if let Some(pos) = DEFAULT_ALPHABET.iter().position(|&d| d == c) {
        if pos as u8 != ESCAPE {
            return Some(Septet::Single(pos as u8));
        }
    }
    EXTENSION
        .iter()
        .find(|(_, ext)| *ext == c)
        .map(|(code, _)| Septet::Escaped(*code))
}

/// Whether every character of `text` is representable in GSM 7-bit
pub fn is_gsm7(text: &str) -> bool {
    text.chars().all(|c| encode_char(c).is_some())
}

/// Per-character septets; `Err` carries the first unrepresentable character
pub fn char_septets(text: &str) -> Result<Vec<Septet>, char> {
    text.chars().map(|c| encode_char(c).ok_or(c)).collect()
}

/// Flatten character septets into the raw septet stream
pub fn flatten(chars: &[Septet]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chars.len());
    for septet in chars {
        septet.push_into(&mut out);
    }
    out
}

/// Septet stream back to text
///
/// An escape followed by an unknown extension code yields the default-table
/// character of that code.
pub fn septets_to_string(septets: &[u8]) -> String {
    let mut text = String::with_capacity(septets.len());
    let mut iter = septets.iter().map(|s| s & 0x7F);
    while let Some(code) = iter.next() {
        if code == ESCAPE {
            let Some(ext) = iter.next() else { break };
            let c = EXTENSION
                .iter()
                .find(|(k, _)| *k == ext)
                .map(|(_, c)| *c)
                .unwrap_or(DEFAULT_ALPHABET[ext as usize]);
            text.push(c);
        } else {
            text.push(DEFAULT_ALPHABET[code as usize]);
        }
    }
    text
}

/// Pack septets LSB-first, preceded by `fill_bits` zero bits
pub fn pack_septets(septets: &[u8], fill_bits: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity((septets.len() * 7 + fill_bits as usize).div_ceil(8));
    let mut acc: u32 = 0;
    let mut nbits = u32::from(fill_bits);
    for &septet in septets {
        acc |= u32::from(septet & 0x7F) << nbits;
        nbits += 7;
        while nbits >= 8 {
            out.push((acc & 0xFF) as u8);
            acc >>= 8;
            nbits -= 8;
        }
    }
    if nbits > 0 {
        out.push((acc & 0xFF) as u8);
    }
    out
}

/// Unpack `count` septets starting `skip_bits` into `data`
///
/// Returns `None` when `data` is too short.
pub fn unpack_septets(data: &[u8], count: usize, skip_bits: usize) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let bit = skip_bits + i * 7;
        let byte = bit / 8;
        let shift = bit % 8;
        let lo = u16::from(*data.get(byte)?);
        let hi = if shift > 1 {
            u16::from(*data.get(byte + 1)?)
        } else {
            u16::from(data.get(byte + 1).copied().unwrap_or(0))
        };
        out.push((((lo | (hi << 8)) >> shift) & 0x7F) as u8);
    }
    Some(out)
}
