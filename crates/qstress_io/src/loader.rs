use anyhow::{Context, Result, bail};
use bitvec::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// One decoded record of a .b8 file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyndromeRecord {
    pub syndrome: BitVec<u64, Lsb0>,
    /// Logical observable bit, when the file carries one.
    pub observable: Option<bool>,
}

/// Loads a .b8 file (bit-packed, little-endian within each byte).
pub fn load_b8_file<P: AsRef<Path>>(path: P) -> Result<BitVec<u8, Lsb0>> {
    let path = path.as_ref();
    let mut file = File::open(path)
        .with_context(|| format!("Failed to open .b8 file {}", path.display()))?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;

    Ok(BitVec::<u8, Lsb0>::from_vec(buffer))
}

/// Number of bits one shot occupies once padded to whole bytes.
pub fn record_stride(num_detectors: usize, with_observable: bool) -> usize {
    (num_detectors + usize::from(with_observable)).div_ceil(8) * 8
}

/// Splits raw .b8 contents into per-shot records.
///
/// Each record holds `num_detectors` detector bits followed, when
/// `with_observable` is set, by one observable bit, padded to a byte
/// boundary. A trailing partial record is dropped with a warning.
pub fn slice_shots(
    raw_bits: &BitSlice<u8, Lsb0>,
    num_detectors: usize,
    with_observable: bool,
) -> Result<Vec<SyndromeRecord>> {
    if num_detectors == 0 {
        bail!("cannot slice shots with zero detectors per shot");
    }
    let stride = record_stride(num_detectors, with_observable);
    let num_shots = raw_bits.len() / stride;
    if raw_bits.len() % stride != 0 {
        log::warn!(
            "ignoring {} trailing bytes that do not form a whole shot",
            (raw_bits.len() % stride) / 8
        );
    }

    let mut shots = Vec::with_capacity(num_shots);
    for i in 0..num_shots {
        let start = i * stride;
        let mut syndrome = BitVec::<u64, Lsb0>::with_capacity(num_detectors);
        syndrome.extend_from_bitslice(&raw_bits[start..start + num_detectors]);
        let observable = with_observable.then(|| raw_bits[start + num_detectors]);
        shots.push(SyndromeRecord {
            syndrome,
            observable,
        });
    }

    Ok(shots)
}

/// Streams shots into a .b8 file.
pub struct B8Writer<W: Write> {
    out: W,
    num_detectors: usize,
    with_observable: bool,
    record: BitVec<u8, Lsb0>,
    shots: u64,
}

impl<W: Write> B8Writer<W> {
    pub fn new(out: W, num_detectors: usize, with_observable: bool) -> Self {
        Self {
            out,
            num_detectors,
            with_observable,
            record: BitVec::repeat(false, record_stride(num_detectors, with_observable)),
            shots: 0,
        }
    }

    /// Appends one shot; `observable` is ignored when the file has no observable column.
    pub fn write_shot(&mut self, syndrome: &BitSlice<u64, Lsb0>, observable: bool) -> Result<()> {
        if syndrome.len() != self.num_detectors {
            bail!(
                "shot has {} detector bits, file expects {}",
                syndrome.len(),
                self.num_detectors
            );
        }
        self.record.fill(false);
        for i in syndrome.iter_ones() {
            self.record.set(i, true);
        }
        if self.with_observable {
            self.record.set(self.num_detectors, observable);
        }
        self.out.write_all(self.record.as_raw_slice())?;
        self.shots += 1;
        Ok(())
    }

    pub fn shots_written(&self) -> u64 {
        self.shots
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Creates a buffered .b8 writer at `path`.
pub fn create_b8_file<P: AsRef<Path>>(
    path: P,
    num_detectors: usize,
    with_observable: bool,
) -> Result<B8Writer<BufWriter<File>>> {
    let path = path.as_ref();
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(B8Writer::new(
        BufWriter::new(file),
        num_detectors,
        with_observable,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(len: usize, ones: &[usize]) -> BitVec<u64, Lsb0> {
        let mut v = BitVec::repeat(false, len);
        for &i in ones {
            v.set(i, true);
        }
        v
    }

    #[test]
    fn records_are_byte_padded() {
        assert_eq!(record_stride(8, false), 8);
        assert_eq!(record_stride(8, true), 16);
        assert_eq!(record_stride(3, true), 8);
    }

    #[test]
    fn writer_packs_detectors_then_observable() {
        let mut w = B8Writer::new(Vec::new(), 10, true);
        w.write_shot(&bits(10, &[0, 9]), true).unwrap();
        w.write_shot(&bits(10, &[3]), false).unwrap();
        assert_eq!(w.shots_written(), 2);
        let bytes = w.finish().unwrap();
        assert_eq!(bytes, vec![0b0000_0001, 0b0000_0110, 0b0000_1000, 0b0000_0000]);

        let raw = BitVec::<u8, Lsb0>::from_vec(bytes);
        let shots = slice_shots(&raw, 10, true).unwrap();
        assert_eq!(shots.len(), 2);
        assert_eq!(shots[0].syndrome, bits(10, &[0, 9]));
        assert_eq!(shots[0].observable, Some(true));
        assert_eq!(shots[1].syndrome, bits(10, &[3]));
        assert_eq!(shots[1].observable, Some(false));
    }

    #[test]
    fn trailing_partial_record_is_dropped() {
        let raw = BitVec::<u8, Lsb0>::from_vec(vec![0xFF, 0x01, 0x02]);
        let shots = slice_shots(&raw, 16, false).unwrap();
        assert_eq!(shots.len(), 1);
        assert_eq!(shots[0].observable, None);
        assert_eq!(shots[0].syndrome.count_ones(), 9);
    }

    #[test]
    fn wrong_width_shot_is_rejected() {
        let mut w = B8Writer::new(Vec::new(), 4, false);
        assert!(w.write_shot(&bits(5, &[]), false).is_err());
        assert!(slice_shots(&BitVec::<u8, Lsb0>::new(), 0, false).is_err());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shots.b8");
        let mut w = create_b8_file(&path, 5, true).unwrap();
        w.write_shot(&bits(5, &[1, 4]), true).unwrap();
        w.finish().unwrap();
        let raw = load_b8_file(&path).unwrap();
        let shots = slice_shots(&raw, 5, true).unwrap();
        assert_eq!(shots[0].syndrome, bits(5, &[1, 4]));
        assert_eq!(shots[0].observable, Some(true));
    }
}
