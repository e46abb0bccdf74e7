use pem::{EncodeConfig, LineEnding, Pem};

use crate::error::{CaError, Result};

pub const CERTIFICATE: &str = "CERTIFICATE";
pub const CERTIFICATE_REQUEST: &str = "CERTIFICATE REQUEST";
pub const X509_CRL: &str = "X509 CRL";

/// Convert DER‑encoded data into a PEM‑encoded string with the provided label.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    let pem = Pem::new(label, der);
    pem::encode_config(&pem, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

/// Returns the DER contents of every PEM block carrying `label`, in file order.
pub fn blocks_with_label(pem_str: &str, label: &str) -> Result<Vec<Vec<u8>>> {
    Ok(pem::parse_many(pem_str)?
        .into_iter()
        .filter(|block| block.tag() == label)
        .map(|block| block.into_contents())
        .collect())
}

/// Returns the DER contents of the first PEM block carrying `label`.
///
/// Certificate files produced by the CA hold the leaf first, followed by the
/// CA certificate, so this yields the leaf.
pub fn first_block(pem_str: &str, label: &str) -> Result<Vec<u8>> {
    blocks_with_label(pem_str, label)?
        .into_iter()
        .next()
        .ok_or_else(|| CaError::DecodingError(format!("no {label} PEM block found")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_block_skips_other_labels() {
        let text = format!(
            "{}{}{}",
            der_to_pem(&[1, 2, 3], X509_CRL),
            der_to_pem(&[4, 5], CERTIFICATE),
            der_to_pem(&[6], CERTIFICATE)
        );
        assert_eq!(first_block(&text, CERTIFICATE).unwrap(), vec![4, 5]);
        assert_eq!(blocks_with_label(&text, CERTIFICATE).unwrap().len(), 2);
        assert!(first_block(&text, CERTIFICATE_REQUEST).is_err());
    }
}
