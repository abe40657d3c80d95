use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use gzindex::{Error, IndexSource, IndexedGzip, Options};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, Cursor, Read, Seek, SeekFrom, Write};

const SPACING: u64 = 32768;

fn text(lines: u32) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..lines {
        let noise = i.wrapping_mul(2654435761) % 1000003;
        out.extend_from_slice(format!("{i:08} {noise}\n").as_bytes());
    }
    out
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn open(gz: &[u8], options: Options) -> IndexedGzip<Cursor<Vec<u8>>> {
    IndexedGzip::from_reader(Cursor::new(gz.to_vec()), options).unwrap()
}

fn not_covered<T: std::fmt::Debug>(result: Result<T, Error>) -> (u64, u64) {
    match result {
        Err(Error::NotCovered { offset, coverage }) => (offset, coverage),
        other => panic!("expected NotCovered, got {other:?}"),
    }
}

#[test]
fn seek_then_read() {
    let plain = text(100_000);
    let mut gz = open(&gzip(&plain), Options::default().spacing(SPACING));

    for offset in [0usize, 1, 70_000, 1_400_000, 12, 999_999, plain.len() - 3] {
        assert_eq!(gz.seek(offset as u64).unwrap(), offset as u64);
        assert_eq!(gz.tell().unwrap(), offset as u64);
        let end = (offset + 1000).min(plain.len());
        assert_eq!(
            gz.read(1000).unwrap(),
            &plain[offset..end],
            "offset {offset}"
        );
        assert_eq!(gz.tell().unwrap(), end as u64);
    }
}

#[test]
fn seek_past_end_clamps() {
    let plain = text(1000);
    let end = plain.len() as u64;
    let mut gz = open(&gzip(&plain), Options::default());
    assert_eq!(gz.seek(u64::MAX).unwrap(), end);
    assert_eq!(gz.read(10).unwrap(), b"");
    assert_eq!(gz.seek_from(SeekFrom::Current(-6)).unwrap(), end - 6);
    assert_eq!(gz.read_all().unwrap(), &plain[plain.len() - 6..]);
    assert!(matches!(gz.seek_from(SeekFrom::End(-1)), Err(Error::UnsupportedSeek)));
}

#[test]
fn zero_length_reads() {
    let plain = text(10);
    let mut gz = open(&gzip(&plain), Options::default());
    gz.seek(5).unwrap();
    assert_eq!(gz.read(0).unwrap(), b"");
    assert_eq!(gz.read_into(&mut []).unwrap(), 0);
    assert_eq!(gz.tell().unwrap(), 5);
}

#[test]
fn lazy_and_full_builds_agree() {
    let plain = text(150_000);
    let compressed = gzip(&plain);

    let mut eager = open(&compressed, Options::default().spacing(SPACING));
    eager.build_full_index().unwrap();
    assert!(eager.index().is_complete());
    assert!(eager.index().len() > 5);

    let mut lazy = open(&compressed, Options::default().spacing(SPACING));
    let mut buf = vec![0u8; 7919];
    let mut seen = Vec::new();
    loop {
        let n = lazy.read_into(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        seen.extend_from_slice(&buf[..n]);
        if seen.len() > 400_000 && seen.len() < 410_000 {
            // jump back and forth inside the part already indexed
            lazy.seek(1234).unwrap();
            lazy.seek(seen.len() as u64).unwrap();
        }
    }
    assert_eq!(seen, plain);
    assert_eq!(lazy.index(), eager.index());
    assert_eq!(
        lazy.index().total_compressed_length(),
        Some(compressed.len() as u64)
    );
}

#[test]
fn scattered_seeks_build_the_same_index() {
    let plain = text(150_000);
    let compressed = gzip(&plain);

    let mut eager = open(&compressed, Options::default().spacing(SPACING));
    eager.build_full_index().unwrap();

    // every seek lands past what is indexed so far
    let mut lazy = open(&compressed, Options::default().spacing(SPACING));
    for offset in [90_000usize, 700_001, 1_300_000, 2_000_000] {
        assert!(!lazy.index().covers(offset as u64));
        lazy.seek(offset as u64).unwrap();
        assert_eq!(lazy.read(50).unwrap(), &plain[offset..offset + 50]);
    }
    assert!(!lazy.index().is_complete());

    lazy.seek(0).unwrap();
    assert_eq!(lazy.read_all().unwrap(), plain);
    assert_eq!(lazy.index(), eager.index());
}

#[test]
fn export_and_import() {
    let plain = text(80_000);
    let compressed = gzip(&plain);
    let mut built = open(&compressed, Options::default().spacing(SPACING));
    built.build_full_index().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let index_path = dir.path().join("data.gzix");
    built.export_index(&index_path).unwrap();

    let options = Options::default()
        .auto_build(false)
        .index(IndexSource::Path(index_path.clone()));
    let mut imported = open(&compressed, options);
    assert_eq!(imported.index(), built.index());
    assert_eq!(
        imported.seek_points().collect::<Vec<_>>(),
        built.seek_points().collect::<Vec<_>>()
    );

    for offset in [plain.len() - 1, 500_000, 3] {
        let end = (offset + 64).min(plain.len());
        imported.seek(offset as u64).unwrap();
        assert_eq!(imported.read(64).unwrap(), &plain[offset..end]);
    }

    let mut bytes = Vec::new();
    built.export_index_to(&mut bytes).unwrap();
    let options = Options::default().index(IndexSource::Bytes(bytes));
    let mut from_bytes = open(&compressed, options);
    assert_eq!(from_bytes.index(), built.index());
    from_bytes.seek(600_000).unwrap();
    assert_eq!(from_bytes.read(10).unwrap(), &plain[600_000..600_010]);
}

#[test]
fn empty_stream_index() {
    let compressed = gzip(b"");
    let mut built = open(&compressed, Options::default());
    built.build_full_index().unwrap();
    assert_eq!(built.index().total_uncompressed_length(), Some(0));
    let mut bytes = Vec::new();
    built.export_index_to(&mut bytes).unwrap();

    let options = Options::default()
        .auto_build(false)
        .index(IndexSource::Bytes(bytes));
    let mut gz = open(&compressed, options);
    assert!(gz.index().is_complete());
    assert_eq!(gz.index(), built.index());
    assert_eq!(gz.seek(5).unwrap(), 0);
    assert_eq!(gz.read_all().unwrap(), b"");
    assert_eq!(gz.readline(None).unwrap(), b"");
}

#[test]
fn failed_import_keeps_index() {
    let plain = text(50_000);
    let compressed = gzip(&plain);
    let mut gz = open(&compressed, Options::default().spacing(SPACING));
    gz.build_full_index().unwrap();
    let before = gz.index().clone();

    assert!(matches!(
        gz.import_index_from(&b"definitely not an index"[..]),
        Err(Error::IndexMagic)
    ));
    assert_eq!(gz.index(), &before);

    let options = Options::default().spacing(SPACING).concatenated(false);
    let mut other = open(&compressed, options);
    other.build_full_index().unwrap();
    let mut bytes = Vec::new();
    other.export_index_to(&mut bytes).unwrap();
    assert!(matches!(
        gz.import_index_from(&bytes[..]),
        Err(Error::IndexIncompatible(_))
    ));
    assert_eq!(gz.index(), &before);
}

#[test]
fn unusable_index_files() {
    let plain = text(50_000);
    let compressed = gzip(&plain);
    let mut gz = open(&compressed, Options::default().spacing(SPACING));
    gz.build_full_index().unwrap();
    let full = gz.index().clone();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.gzix");
    gz.export_index(&path).unwrap();

    // a file opened for reading only cannot take an export
    let read_only = File::open(&path).unwrap();
    assert!(matches!(gz.export_index_to(read_only), Err(Error::Io(_))));
    assert_eq!(gz.index(), &full);

    let missing = dir.path().join("no such dir").join("data.gzix");
    assert!(matches!(gz.export_index(&missing), Err(Error::Io(_))));

    // and one opened for writing only cannot be imported from
    let mut fresh = open(&compressed, Options::default().spacing(SPACING));
    let before = fresh.index().clone();
    let write_only = OpenOptions::new().write(true).open(&path).unwrap();
    assert!(matches!(fresh.import_index_from(write_only), Err(Error::Io(_))));
    assert_eq!(fresh.index(), &before);
    assert_eq!(fresh.read(10).unwrap(), &plain[..10]);

    // neither attempt touched the file
    fresh.import_index(&path).unwrap();
    assert_eq!(fresh.index(), &full);
}

#[test]
fn concatenated_members() {
    let first = text(20_000);
    let second = b"and a second member\n".repeat(5000);
    let mut compressed = gzip(&first);
    compressed.extend_from_slice(&gzip(&second));

    let mut gz = open(&compressed, Options::default().spacing(SPACING));
    let all = gz.read_all().unwrap();
    assert_eq!(all.len(), first.len() + second.len());
    assert_eq!(&all[..first.len()], &first[..]);
    assert_eq!(&all[first.len()..], &second[..]);

    // across the member boundary, from a fresh engine and from the index
    let offset = first.len() as u64 - 5;
    gz.seek(offset).unwrap();
    assert_eq!(gz.read(10).unwrap(), &all[offset as usize..][..10]);
    let mut fresh = open(&compressed, Options::default().spacing(SPACING));
    fresh.seek(first.len() as u64 + 50_000).unwrap();
    assert_eq!(fresh.read(8).unwrap(), &all[first.len() + 50_000..][..8]);

    let mut single = open(&compressed, Options::default().concatenated(false));
    assert_eq!(single.read_all().unwrap(), first);
}

#[test]
fn without_auto_build() {
    let plain = text(60_000);
    let first_line = plain.iter().position(|&b| b == b'\n').unwrap() + 1;
    let options = Options::default().spacing(SPACING).auto_build(false);
    let mut gz = open(&gzip(&plain), options);

    // offset 0 is always covered
    assert_eq!(gz.read(200_000).unwrap(), &plain[..200_000]);
    assert_eq!(gz.tell().unwrap(), 200_000);

    // reads start where a seek could go, and nothing moves when they fail
    assert_eq!(not_covered(gz.read(10)), (200_000, 0));
    assert_eq!(not_covered(gz.readline(None)), (200_000, 0));
    assert_eq!(not_covered(gz.readlines(None)), (200_000, 0));
    assert_eq!(not_covered(gz.read_into(&mut [0u8; 4])), (200_000, 0));
    assert!(Read::read(&mut gz, &mut [0u8; 4]).is_err());
    assert_eq!(gz.tell().unwrap(), 200_000);
    assert_eq!(gz.read(0).unwrap(), b"");

    assert_eq!(not_covered(gz.seek(300_000)), (300_000, 0));
    assert_eq!(gz.tell().unwrap(), 200_000);
    assert_eq!(gz.index().len(), 1);
    assert!(!gz.index().is_complete());

    assert!(gz.extend_index(300_000).unwrap());
    assert!(gz.index().covers(300_000));
    assert_eq!(gz.read(10).unwrap(), &plain[200_000..200_010]);
    gz.seek(250_000).unwrap();
    assert_eq!(gz.read(5).unwrap(), &plain[250_000..250_005]);
    gz.seek(0).unwrap();
    assert_eq!(gz.readline(None).unwrap(), &plain[..first_line]);
}

#[test]
fn u64_values() {
    let values: Vec<u64> = (0..65536u64).map(u64::to_le).collect();
    let plain: &[u8] = bytemuck::cast_slice(&values);
    let mut gz = open(&gzip(plain), Options::default().spacing(SPACING));

    gz.seek(65535 * 8).unwrap();
    let bytes = gz.read(8).unwrap();
    assert_eq!(u64::from_le_bytes(bytes.try_into().unwrap()), 65535);

    for value in [0u64, 4096, 31337, 2] {
        gz.seek(value * 8).unwrap();
        let bytes = gz.read(8).unwrap();
        assert_eq!(u64::from_le_bytes(bytes.try_into().unwrap()), value);
    }
}

#[test]
fn readline_limits() {
    let plain = b"line 1\nsecond line\n\n4\nno newline at end";
    let mut gz = open(&gzip(plain), Options::default());

    assert_eq!(gz.readline(None).unwrap(), b"line 1\n");
    assert_eq!(gz.readline(Some(3)).unwrap(), b"sec");
    assert_eq!(gz.readline(Some(100)).unwrap(), b"ond line\n");
    assert_eq!(gz.readline(Some(0)).unwrap(), b"");
    assert_eq!(gz.tell().unwrap(), 19);
    assert_eq!(gz.readline(None).unwrap(), b"\n");
    assert_eq!(gz.readline(Some(2)).unwrap(), b"4\n");
    assert_eq!(gz.readline(None).unwrap(), b"no newline at end");
    assert_eq!(gz.readline(None).unwrap(), b"");

    gz.seek(0).unwrap();
    assert_eq!(gz.readlines(Some(10)).unwrap().len(), 2);
    let rest: Vec<&[u8]> = vec![b"\n", b"4\n", b"no newline at end"];
    assert_eq!(gz.readlines(None).unwrap(), rest);

    gz.seek(7).unwrap();
    // BufRead::lines would take the engine by value
    let lines: Vec<Vec<u8>> = IndexedGzip::lines(&mut gz)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(lines.len(), 4);
}

#[test]
fn readline_limit_around_line_length() {
    let plain = b"one\ntwo\nthree\nfour\nfive\n";
    let mut gz = open(&gzip(plain), Options::default());

    // "three\n" starts at 8
    let start = 8;
    let line: &[u8] = b"three\n";
    let expected: [&[u8]; 4] = [b"three", line, line, line];
    for (limit, expected) in (line.len() - 1..).zip(expected) {
        gz.seek(start).unwrap();
        assert_eq!(gz.readline(Some(limit)).unwrap(), expected, "limit {limit}");
        assert_eq!(gz.tell().unwrap(), start + expected.len() as u64);
    }
    assert_eq!(gz.readline(None).unwrap(), b"four\n");
}

#[test]
fn std_io_traits() {
    let plain = text(5000);
    let mut gz = open(&gzip(&plain), Options::default());

    Seek::seek(&mut gz, SeekFrom::Start(9)).unwrap();
    let mut line = String::new();
    gz.read_line(&mut line).unwrap();
    let end = 9 + plain[9..].iter().position(|&b| b == b'\n').unwrap() + 1;
    assert_eq!(line.as_bytes(), &plain[9..end]);

    let mut buf = [0u8; 4];
    assert_eq!(Read::read(&mut gz, &mut buf).unwrap(), 4);
    assert_eq!(&buf, &plain[end..end + 4]);

    let mut rest = Vec::new();
    gz.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, &plain[end + 4..]);
    assert_eq!(Seek::stream_position(&mut gz).unwrap(), plain.len() as u64);
}

#[test]
fn zlib_stream() {
    let plain = text(30_000);
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&plain).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut gz = open(&compressed, Options::default().spacing(SPACING));
    gz.seek(200_000).unwrap();
    assert_eq!(gz.read(20).unwrap(), &plain[200_000..200_020]);
    gz.build_full_index().unwrap();
    let total = gz.index().total_uncompressed_length();
    assert_eq!(total, Some(plain.len() as u64));
    gz.seek(10).unwrap();
    assert_eq!(gz.read(20).unwrap(), &plain[10..30]);
}

#[test]
fn corrupt_streams() {
    let mut gz = open(b"this is not compressed at all", Options::default());
    assert!(matches!(gz.read(1), Err(Error::CorruptStream { .. })));

    let plain = text(20_000);
    let compressed = gzip(&plain);
    let mut gz = open(&compressed[..compressed.len() / 2], Options::default());
    assert!(matches!(gz.read_all(), Err(Error::CorruptStream { .. })));

    let mut gz = open(&[], Options::default());
    assert!(matches!(gz.read(1), Err(Error::CorruptStream { .. })));
}

#[test]
fn dropped_handles() {
    let plain = text(40_000);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&gzip(&plain)).unwrap();
    file.flush().unwrap();

    let options = Options::default().spacing(SPACING).drop_handles(true);
    let mut gz = IndexedGzip::open(file.path(), options).unwrap();
    assert_eq!(gz.path(), Some(file.path()));
    assert!(matches!(gz.get_ref(), Err(Error::NoHandle)));

    assert_eq!(gz.read(10).unwrap(), &plain[..10]);
    assert!(matches!(gz.get_ref(), Err(Error::NoHandle)));
    gz.seek(400_000).unwrap();
    assert_eq!(gz.read(10).unwrap(), &plain[400_000..400_010]);
    gz.seek(20).unwrap();
    assert_eq!(gz.read(10).unwrap(), &plain[20..30]);

    let mut kept = IndexedGzip::open(file.path(), Options::default()).unwrap();
    assert!(kept.get_ref().is_ok());
    kept.close().unwrap();
    assert!(matches!(kept.get_ref(), Err(Error::Closed)));
    assert!(matches!(kept.close(), Err(Error::Closed)));
    assert!(matches!(kept.seek(0), Err(Error::Closed)));
}

#[test]
fn closed_external_reader() {
    let plain = text(100);
    let mut gz = open(&gzip(&plain), Options::default());
    assert_eq!(gz.read(5).unwrap(), &plain[..5]);
    assert!(gz.get_ref().is_ok());

    gz.close().unwrap();
    assert!(matches!(gz.get_ref(), Err(Error::Closed)));
    assert!(matches!(gz.read(1), Err(Error::Closed)));
    assert!(gz.into_inner().is_some());
}

#[test]
fn construction_errors() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&gzip(b"x")).unwrap();
    let path = file.path();

    let reader = File::open(path).unwrap();
    assert!(matches!(
        IndexedGzip::new(Some(path), Some(reader), Options::default()),
        Err(Error::AmbiguousSource)
    ));
    let reader = File::open(path).unwrap();
    let options = Options::default().drop_handles(true);
    assert!(matches!(
        IndexedGzip::new(None, Some(reader), options),
        Err(Error::DropExternalHandle)
    ));
    assert!(matches!(
        IndexedGzip::open(path, Options::default().mode("rb+")),
        Err(Error::WriteMode(_))
    ));
    assert!(matches!(
        IndexedGzip::open(path, Options::default().spacing(100)),
        Err(Error::InvalidSpacing(100))
    ));
    assert!(matches!(
        IndexedGzip::open(path.with_extension("missing"), Options::default()),
        Err(Error::Io(_))
    ));

    let reader = File::open(path).unwrap();
    let mut gz = IndexedGzip::new(None, Some(reader), Options::default()).unwrap();
    assert_eq!(gz.read_all().unwrap(), b"x");
    assert!(gz.into_inner().is_some());
}
