//! Record extraction and ordering.
//!
//! A record is a run of bytes terminated by the delimiter (`\n` by default). Records are never copied while
//! sorting: they are addressed by [`RecordRef`]s pointing into the buffer they were read into.

use std::cmp::Ordering;

/// Zero-copy view of one record inside a buffer fill.
///
/// A reference is only meaningful for the fill it was extracted from. Refilling the buffer invalidates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef {
    pub offset: u32,
    pub length: u32,
}

impl RecordRef {
    pub fn new(offset: usize, length: usize) -> Self {
        RecordRef {
            offset: offset as u32,
            length: length as u32,
        }
    }

    /// Returns the record bytes.
    ///
    /// # Panics
    /// Panics if the reference lies outside of `buf`, which means it was extracted from another fill.
    #[inline]
    pub fn resolve<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        let start = self.offset as usize;
        &buf[start..start + self.length as usize]
    }
}

/// Extracts every complete delimiter-terminated record of `buf` into `refs`.
///
/// `refs` is cleared first. Returns the length of the unterminated trailing fragment, which starts at
/// `buf.len() - fragment` and is not part of the output. A buffer without any delimiter is a fragment as a whole.
pub fn extract_records(buf: &[u8], delimiter: u8, refs: &mut Vec<RecordRef>) -> usize {
    refs.clear();

    let mut start = 0;
    for pos in memchr::memchr_iter(delimiter, buf) {
        refs.push(RecordRef::new(start, pos - start));
        start = pos + 1;
    }

    return buf.len() - start;
}

/// Record collation: shorter records first, records of equal length in unsigned byte order.
///
/// For decimal numbers without leading zeros this is the numeric order.
#[inline]
pub fn compare_records(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Sorts references in place by the collation of the records they point to in `buf`.
pub fn sort_records(buf: &[u8], refs: &mut [RecordRef]) {
    refs.sort_unstable_by(|a, b| compare_records(a.resolve(buf), b.resolve(buf)));
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{compare_records, extract_records, sort_records, RecordRef};

    fn records<'a>(buf: &'a [u8], refs: &[RecordRef]) -> Vec<&'a [u8]> {
        refs.iter().map(|r| r.resolve(buf)).collect()
    }

    #[rstest]
    #[case(b"", vec![], 0)]
    #[case(b"42", vec![], 2)]
    #[case(b"1\n22\n333\n", vec![b"1".as_slice(), b"22".as_slice(), b"333".as_slice()], 0)]
    #[case(b"1\n22\n33", vec![b"1".as_slice(), b"22".as_slice()], 2)]
    #[case(b"\n\n", vec![b"".as_slice(), b"".as_slice()], 0)]
    #[case(b"a\n\nb\n", vec![b"a".as_slice(), b"".as_slice(), b"b".as_slice()], 0)]
    fn test_extract_records(#[case] buf: &[u8], #[case] expected: Vec<&[u8]>, #[case] expected_fragment: usize) {
        let mut refs = Vec::new();
        let fragment = extract_records(buf, b'\n', &mut refs);

        assert_eq!(fragment, expected_fragment);
        assert_eq!(records(buf, &refs), expected);
    }

    #[test]
    fn test_extract_clears_previous_refs() {
        let mut refs = vec![RecordRef::new(100, 5)];
        extract_records(b"x\n", b'\n', &mut refs);

        assert_eq!(refs, vec![RecordRef::new(0, 1)]);
    }

    #[test]
    fn test_extract_custom_delimiter() {
        let buf = b"b\0a\0c";
        let mut refs = Vec::new();
        let fragment = extract_records(buf, b'\0', &mut refs);

        assert_eq!(fragment, 1);
        assert_eq!(records(buf, &refs), vec![b"b".as_slice(), b"a".as_slice()]);
    }

    #[rstest]
    #[case(b"9", b"10", Ordering::Less)]
    #[case(b"10", b"9", Ordering::Greater)]
    #[case(b"123", b"124", Ordering::Less)]
    #[case(b"7", b"7", Ordering::Equal)]
    #[case(b"", b"0", Ordering::Less)]
    #[case(b"\x7f", b"\x80", Ordering::Less)]
    #[case(b"zz", b"aaa", Ordering::Less)]
    fn test_compare_records(#[case] a: &[u8], #[case] b: &[u8], #[case] expected: Ordering) {
        assert_eq!(compare_records(a, b), expected);
    }

    #[test]
    fn test_sort_records_numeric_order() {
        let mut numbers = Vec::from_iter(0..1000u32);
        numbers.shuffle(&mut rand::thread_rng());

        let mut buf = Vec::new();
        for n in &numbers {
            buf.extend_from_slice(format!("{}\n", n).as_bytes());
        }

        let mut refs = Vec::new();
        extract_records(&buf, b'\n', &mut refs);
        sort_records(&buf, &mut refs);

        let actual: Vec<u32> = records(&buf, &refs)
            .into_iter()
            .map(|r| std::str::from_utf8(r).unwrap().parse().unwrap())
            .collect();

        assert_eq!(actual, Vec::from_iter(0..1000u32));
    }
}
