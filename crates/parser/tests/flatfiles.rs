use blockidx_parser::flatfiles::{FileError, FixedRecord, FixedSizeFile, IndexedFile};

/// A record whose size does not divide the growth step.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Odd([u8; 13]);

impl FixedRecord for Odd {
    const SIZE: usize = 13;

    fn write_to(&self, out: &mut [u8]) {
        out.copy_from_slice(&self.0);
    }

    fn read_from(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 13];
        raw.copy_from_slice(&bytes[..13]);
        Odd(raw)
    }
}

#[test]
fn fixed_records_survive_a_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("values.dat");
    {
        let mut file = FixedSizeFile::<u64>::open(&path).expect("open");
        for value in [10u64, 20, 30, 40] {
            file.append(&value).expect("append");
        }
        file.write(1, &21).expect("write");
        file.update(2, |value| *value += 1).expect("update");
        file.flush().expect("flush");
    }
    let mut file = FixedSizeFile::<u64>::open(&path).expect("reopen");
    assert_eq!(file.len(), 4);
    assert_eq!(file.read(1).expect("read"), 21);
    assert_eq!(file.read(2).expect("read"), 31);
    assert_eq!(file.last().expect("last"), Some(40));

    file.truncate(2);
    assert_eq!(file.len(), 2);
    assert!(matches!(
        file.read(2),
        Err(FileError::OutOfRange { index: 2, len: 2 })
    ));
    assert_eq!(file.append(&50).expect("append"), 2);
}

#[test]
fn fixed_file_rejects_a_torn_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("torn.dat");
    std::fs::write(&path, [0u8; 7]).expect("write");
    assert!(matches!(
        FixedSizeFile::<u32>::open(&path),
        Err(FileError::Corrupt(_))
    ));
}

#[test]
fn spare_capacity_left_by_a_killed_writer_is_whole_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("odd.dat");
    let mut file = FixedSizeFile::<Odd>::open(&path).expect("open");
    for byte in 1..=3u8 {
        file.append(&Odd([byte; 13])).expect("append");
    }
    std::mem::forget(file);

    let on_disk = std::fs::metadata(&path).expect("metadata").len() as usize;
    assert!(on_disk > 3 * Odd::SIZE);
    assert_eq!(on_disk % Odd::SIZE, 0);

    let mut file = FixedSizeFile::<Odd>::open(&path).expect("reopen");
    assert_eq!(file.len(), on_disk / Odd::SIZE);
    assert_eq!(file.read(2).expect("read"), Odd([3; 13]));
    file.truncate(3);
    file.flush().expect("flush");
    assert_eq!(std::fs::metadata(&path).expect("metadata").len(), 3 * 13);
}

#[test]
fn indexed_parts_can_be_filled_in_later() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data = dir.path().join("records.dat");
    let index = dir.path().join("records_index.dat");
    {
        let mut file = IndexedFile::<2>::open(&data, &index).expect("open");
        assert_eq!(file.push(b"first").expect("push"), 0);
        assert_eq!(file.push(b"second").expect("push"), 1);
        assert_eq!(file.write_index_group().expect("group"), 2);
        file.write_part(1, 0, b"late").expect("part");
        file.flush().expect("flush");
    }
    let mut file = IndexedFile::<2>::open(&data, &index).expect("reopen");
    assert_eq!(file.len(), 3);
    assert_eq!(file.get(0).expect("get"), [Some(&b"first"[..]), Some(&b"late"[..])]);
    assert_eq!(file.part(1, 1).expect("part"), None);
    assert_eq!(file.part(2, 0).expect("part"), Some(&[][..]));

    if let Some(bytes) = file.part_mut(1, 0).expect("part_mut") {
        bytes[0] = b'S';
    }
    assert_eq!(file.part(1, 0).expect("part"), Some(&b"Second"[..]));
    assert!(matches!(
        file.write_part(2, 0, b"x"),
        Err(FileError::OutOfRange { .. })
    ));
}

#[test]
fn indexed_truncate_forgets_parts_written_after_the_cut() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut file = IndexedFile::<2>::open(dir.path().join("d.dat"), dir.path().join("i.dat"))
        .expect("open");
    file.push(b"kept").expect("push");
    file.push(b"dropped").expect("push");
    file.write_part(1, 0, b"too late").expect("part");

    file.truncate(1).expect("truncate");
    assert_eq!(file.len(), 1);
    assert_eq!(file.get(0).expect("get"), [Some(&b"kept"[..]), None]);
    assert!(file.get(1).is_err());

    assert_eq!(file.push(b"again").expect("push"), 1);
    assert_eq!(file.part(1, 0).expect("part"), Some(&b"again"[..]));
}
