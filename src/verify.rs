//! Comparison of an uploaded image against the memory read back from the device.

/// A byte that differs between the uploaded image and the read back image
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Mismatch {
    pub offset: usize,
    pub expected: u8,
    pub actual: u8,
}

impl core::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "0x{:04x}: expected 0x{:02x}, read 0x{:02x}",
            self.offset, self.expected, self.actual
        )
    }
}

/// Compare two images byte by byte, returning mismatches in offset order.
///
/// Both images are expected to be the same length; only the common prefix is compared.
pub fn compare(expected: &[u8], actual: &[u8]) -> Vec<Mismatch> {
    debug_assert_eq!(expected.len(), actual.len());

    expected
        .iter()
        .zip(actual.iter())
        .enumerate()
        .filter(|(_, (e, a))| e != a)
        .map(|(offset, (&expected, &actual))| Mismatch {
            offset,
            expected,
            actual,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_images_match() {
        let image = [1u8, 2, 3, 4];
        assert!(compare(&image, &image).is_empty());
        assert!(compare(&[], &[]).is_empty());
    }

    #[test]
    fn reports_each_differing_offset() {
        let m = compare(&[0, 1, 2, 3, 4], &[0, 9, 2, 3, 0]);
        assert_eq!(
            m,
            vec![
                Mismatch { offset: 1, expected: 1, actual: 9 },
                Mismatch { offset: 4, expected: 4, actual: 0 },
            ]
        );
        assert_eq!(m[0].to_string(), "0x0001: expected 0x01, read 0x09");
    }
}
