pub struct BitPack;

impl BitPack {
    #[inline(always)]
    pub fn words_for(bits: usize) -> usize {
        bits.div_ceil(64)
    }

    #[inline(always)]
    pub fn get(storage: &[u64], index: usize) -> bool {
        (storage[index / 64] >> (index % 64)) & 1 == 1
    }

    #[inline(always)]
    pub fn toggle(storage: &mut [u64], index: usize) {
        storage[index / 64] ^= 1 << (index % 64);
    }

    #[inline(always)]
    pub fn set(storage: &mut [u64], index: usize, val: bool) {
        let mask = 1u64 << (index % 64);
        if val {
            storage[index / 64] |= mask;
        } else {
            storage[index / 64] &= !mask;
        }
    }

    /// Indices of set bits in ascending order.
    pub fn iter_ones(storage: &[u64]) -> impl Iterator<Item = usize> + '_ {
        storage.iter().enumerate().flat_map(|(w, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(w * 64 + bit)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_toggle_and_iterate() {
        let mut words = vec![0u64; BitPack::words_for(130)];
        assert_eq!(words.len(), 3);
        BitPack::set(&mut words, 3, true);
        BitPack::toggle(&mut words, 64);
        BitPack::toggle(&mut words, 129);
        BitPack::toggle(&mut words, 129);
        assert!(BitPack::get(&words, 3));
        assert!(BitPack::get(&words, 64));
        assert!(!BitPack::get(&words, 129));
        assert_eq!(BitPack::iter_ones(&words).collect::<Vec<_>>(), vec![3, 64]);
        BitPack::set(&mut words, 3, false);
        assert_eq!(BitPack::iter_ones(&words).collect::<Vec<_>>(), vec![64]);
    }
}
