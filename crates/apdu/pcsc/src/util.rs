//! ATR matching for reader selection

/// Whether `atr` starts with `pattern`, comparing only the bits set in `mask`
///
/// A missing mask compares every bit. A mask shorter than the pattern never matches.
pub(crate) fn match_atr(atr: &[u8], pattern: &[u8], mask: Option<&[u8]>) -> bool {
    if pattern.len() > atr.len() {
        return false;
    }

    match mask {
        Some(mask) if mask.len() < pattern.len() => false,
        Some(mask) => atr
            .iter()
            .zip(pattern)
            .zip(mask)
            .all(|((a, p), m)| a & m == p & m),
        None => atr.starts_with(pattern),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_prefix_match() {
        let atr = hex!("3B9F96801FC78031A073BE21136743200718000001A5");
        assert!(match_atr(&atr, &hex!("3B9F"), None));
        assert!(!match_atr(&atr, &hex!("3B9E"), None));
        assert!(!match_atr(&hex!("3B"), &hex!("3B9F"), None));
    }

    #[test]
    fn test_masked_match() {
        let atr = hex!("3B9F96801F");
        // Ignore the historical byte count in T0
        assert!(match_atr(&atr, &hex!("3B90"), Some(&hex!("FFF0"))));
        assert!(!match_atr(&atr, &hex!("3F90"), Some(&hex!("FFF0"))));
        assert!(!match_atr(&atr, &hex!("3B90"), Some(&hex!("FF"))));
    }
}
