//! Integration tests for streams over memory-mapped storage.

use runnel_core::{CoreError, MmapStorage, Storage, Stream, StreamConfig, StorageError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

fn config(dir: &TempDir) -> StreamConfig {
    StreamConfig::new().root(dir.path())
}

fn open(dir: &TempDir, id: &str) -> Stream<i64> {
    Stream::open_with_config("test", Some(id), None, config(dir)).unwrap()
}

#[test]
fn round_trip() {
    let dir = tempdir().unwrap();
    let stream = open(&dir, "round-trip");

    let writer = stream.writer().unwrap();
    for i in 0..100 {
        writer.write(&i).unwrap();
    }
    assert_eq!(stream.size(), 100);

    let reader = stream.reader(0).unwrap();
    for i in 0..100 {
        assert_eq!(reader.read().unwrap(), i);
    }
}

#[test]
fn growth_is_transparent() {
    let dir = tempdir().unwrap();
    let stream: Stream<i64> =
        Stream::open_with_config("test", Some("id"), None, config(&dir)).unwrap();

    let writer = stream.writer().unwrap();
    for i in 0..=512 {
        writer.write(&i).unwrap();
    }

    assert_eq!(stream.size(), 513);
    let header = stream.header();
    assert_eq!(header.capacity, 8192);
    assert_eq!(header.tail, 513 * 8);
    assert_eq!(header.last_message, 513 * 8);

    let reader = stream.reader(0).unwrap();
    for i in 0..=512 {
        assert_eq!(reader.read().unwrap(), i);
    }

    let data_len = std::fs::metadata(dir.path().join("id")).unwrap().len();
    assert_eq!(data_len, 8192);
}

#[test]
fn reader_follows_growth_from_before() {
    let dir = tempdir().unwrap();
    let stream = open(&dir, "follow");

    // Attached while the region is still one page.
    let reader = stream.reader(0).unwrap();

    let writer = stream.writer().unwrap();
    for i in 0..1000 {
        writer.write(&i).unwrap();
    }
    assert!(stream.header().capacity > 4096);

    for i in 0..1000 {
        assert_eq!(reader.read().unwrap(), i);
    }
}

#[test]
fn mid_stream_start() {
    let dir = tempdir().unwrap();
    let stream = open(&dir, "mid");

    let writer = stream.writer().unwrap();
    for i in 0..500 {
        writer.write(&i).unwrap();
    }

    let reader = stream.reader(250 * 8).unwrap();
    for i in 250..500 {
        assert_eq!(reader.read().unwrap(), i);
    }
    assert_eq!(reader.try_read().unwrap(), None);
}

#[test]
fn misaligned_base_rejected() {
    let dir = tempdir().unwrap();
    let stream = open(&dir, "misaligned");
    assert!(matches!(
        stream.reader(12),
        Err(CoreError::InvalidOperation { .. })
    ));
}

#[test]
fn fan_out_to_many_readers() {
    let dir = tempdir().unwrap();
    let stream: Stream<i64> = Stream::open_with_config(
        "test",
        Some("fan-out"),
        None,
        config(&dir).flush_on_write(false),
    )
    .unwrap();

    // Half the readers attach before anything is written, half after.
    let early: Vec<_> = (0..5).map(|_| stream.reader(0).unwrap()).collect();

    let writer = stream.writer().unwrap();
    for i in 0..300 {
        writer.write(&i).unwrap();
    }

    let late: Vec<_> = (0..5).map(|_| stream.reader(0).unwrap()).collect();

    let handles: Vec<_> = early
        .into_iter()
        .chain(late)
        .map(|reader| {
            thread::spawn(move || {
                (0..300)
                    .map(|_| reader.read().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let expected: Vec<i64> = (0..300).collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn concurrent_writers_lose_nothing() {
    const WRITERS: usize = 10;
    const RECORDS: usize = 513;

    let dir = tempdir().unwrap();
    let stream: Stream<i64> = Stream::open_with_config(
        "test",
        Some("multi"),
        None,
        config(&dir).flush_on_write(false),
    )
    .unwrap();

    let reader = stream.reader(0).unwrap();
    let consumer = thread::spawn(move || {
        (0..WRITERS * RECORDS)
            .map(|_| reader.read().unwrap())
            .sum::<i64>()
    });

    let producers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let stream = stream.clone();
            thread::spawn(move || {
                let writer = stream.writer().unwrap();
                for _ in 0..RECORDS {
                    writer.write(&3).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert_eq!(consumer.join().unwrap(), (WRITERS * RECORDS * 3) as i64);
    assert_eq!(stream.size(), (WRITERS * RECORDS) as u64);
    let header = stream.header();
    assert_eq!(header.tail, header.last_message);
    assert_eq!(header.tail, (WRITERS * RECORDS * 8) as u64);
}

#[test]
fn handles_on_one_id_share_state() {
    let dir = tempdir().unwrap();
    let first = open(&dir, "shared");
    let second = open(&dir, "shared");

    first.writer().unwrap().write(&1).unwrap();
    second.writer().unwrap().write(&2).unwrap();

    for stream in [&first, &second] {
        let header = stream.header();
        assert_eq!(header.tail, 16);
        assert_eq!(header.last_message, 16);
        assert_eq!(stream.size(), 2);
    }

    let reader = second.reader(0).unwrap();
    assert_eq!(reader.read().unwrap(), 1);
    assert_eq!(reader.read().unwrap(), 2);
}

#[test]
fn handles_on_one_id_follow_growth() {
    let dir = tempdir().unwrap();
    let writer_side = open(&dir, "grow-shared");
    let reader_side = open(&dir, "grow-shared");

    let reader = reader_side.reader(0).unwrap();
    let writer = writer_side.writer().unwrap();
    for i in 0..2000 {
        writer.write(&i).unwrap();
    }

    for i in 0..2000 {
        assert_eq!(reader.read().unwrap(), i);
    }
    assert_eq!(reader_side.header().capacity, writer_side.header().capacity);
    assert_eq!(reader_side.get(1999).unwrap(), 1999);
}

#[test]
fn persists_across_reopen() {
    let dir = tempdir().unwrap();
    {
        let stream = open(&dir, "persist");
        let writer = stream.writer().unwrap();
        for i in 0..600 {
            writer.write(&i).unwrap();
        }
        drop(writer);
        stream.close().unwrap();
    }

    let stream = open(&dir, "persist");
    assert_eq!(stream.size(), 600);
    assert_eq!(stream.header().capacity, 8192);
    assert_eq!(stream.get(599).unwrap(), 599);

    stream.writer().unwrap().write(&600).unwrap();
    let reader = stream.reader(599 * 8).unwrap();
    assert_eq!(reader.read().unwrap(), 599);
    assert_eq!(reader.read().unwrap(), 600);
}

#[test]
fn closed_writer_appends_nothing_more() {
    let dir = tempdir().unwrap();
    let stream = open(&dir, "writer-close");

    let writer = stream.writer().unwrap();
    writer.write(&1).unwrap();
    writer.close();

    assert!(matches!(writer.write(&2), Err(CoreError::Closed)));
    assert!(matches!(writer.send(3), Err(CoreError::Closed)));
    drop(writer);

    thread::sleep(Duration::from_millis(10));
    assert_eq!(stream.size(), 1);
}

#[test]
fn abandoned_reservation_does_not_block_reopened_log() {
    let dir = tempdir().unwrap();
    {
        let stream = open(&dir, "abandoned");
        stream.writer().unwrap().write(&1).unwrap();

        // Another handle reserves a record and goes away without publishing.
        let mut other = MmapStorage::init("abandoned", config(&dir).storage_options()).unwrap();
        other.header().reserve(8);
        other.close().unwrap();
        stream.close().unwrap();
    }

    let config = config(&dir).publish_timeout(Duration::from_millis(50));
    let stream: Stream<i64> =
        Stream::open_with_config("test", Some("abandoned"), None, config).unwrap();
    let writer = stream.writer().unwrap();
    assert_eq!(writer.write(&2).unwrap(), 16);
    assert_eq!(writer.write(&3).unwrap(), 24);
    assert_eq!(writer.write(&4).unwrap(), 32);

    let header = stream.header();
    assert_eq!(header.tail, 40);
    assert_eq!(header.last_message, 40);
    assert_eq!(header.entry_count, 5);
    assert_eq!(stream.get(0).unwrap(), 1);
    assert_eq!(stream.get(1).unwrap(), 0);
    assert_eq!(stream.get(4).unwrap(), 4);
}

#[test]
fn closed_stream_fails_gracefully() {
    let dir = tempdir().unwrap();
    let stream = open(&dir, "stream-close");
    let writer = stream.writer().unwrap();
    let reader = stream.reader(0).unwrap();
    writer.write(&1).unwrap();
    assert_eq!(reader.read().unwrap(), 1);

    stream.close().unwrap();

    assert_eq!(stream.size(), 0);
    assert!(!stream.is_alive());
    assert!(matches!(writer.write(&2), Err(CoreError::Closed)));
    assert!(matches!(reader.read(), Err(CoreError::Closed)));
    assert!(matches!(stream.get(0), Err(CoreError::Closed)));
    assert!(matches!(stream.reader(0), Err(CoreError::Closed)));

    // The files survive the close.
    assert!(dir.path().join("stream-close").exists());
}

#[test]
fn queued_records_are_written_on_finish() {
    let dir = tempdir().unwrap();
    let stream = open(&dir, "queued");

    let writer = stream.writer().unwrap();
    for i in 0..200 {
        writer.send(i).unwrap();
    }
    writer.finish().unwrap();

    assert_eq!(stream.size(), 200);
    let reader = stream.reader(0).unwrap();
    for i in 0..200 {
        assert_eq!(reader.read().unwrap(), i);
    }
}

#[test]
fn get_separates_unpublished_from_out_of_bounds() {
    let dir = tempdir().unwrap();
    let stream = open(&dir, "get");
    stream.writer().unwrap().write(&5).unwrap();

    assert_eq!(stream.get(0).unwrap(), 5);
    match stream.get(1) {
        Err(CoreError::NotYetPublished { offset, watermark }) => {
            assert_eq!(offset, 8);
            assert_eq!(watermark, 8);
        }
        other => panic!("expected NotYetPublished, got {other:?}"),
    }
    assert!(matches!(
        stream.get(512),
        Err(CoreError::Storage(StorageError::OutOfBounds {
            start: 4096,
            valid_end: 4096,
            ..
        }))
    ));
}

#[test]
fn struct_records() {
    use zerocopy::{FromBytes, Immutable, IntoBytes};

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, FromBytes, IntoBytes, Immutable)]
    struct Tick {
        timestamp: u64,
        price: u32,
        volume: u32,
    }

    let dir = tempdir().unwrap();
    let stream: Stream<Tick> =
        Stream::open_with_config("ticks", Some("ticks"), None, config(&dir)).unwrap();
    assert_eq!(stream.record_size(), 16);

    let ticks: Vec<Tick> = (0..50)
        .map(|i| Tick {
            timestamp: 1_700_000_000 + i,
            price: 100 + i as u32,
            volume: 7,
        })
        .collect();
    let writer = stream.writer().unwrap();
    for tick in &ticks {
        writer.write(tick).unwrap();
    }

    let reader = stream.reader(10 * 16).unwrap();
    for tick in &ticks[10..] {
        assert_eq!(reader.read().unwrap(), *tick);
    }
}

#[test]
fn concurrent_growth_from_separate_handles() {
    let dir = tempdir().unwrap();
    let streams: Vec<Arc<Stream<i64>>> = (0..4)
        .map(|_| {
            Arc::new(
                Stream::open_with_config(
                    "test",
                    Some("racing"),
                    None,
                    config(&dir).flush_on_write(false),
                )
                .unwrap(),
            )
        })
        .collect();

    let handles: Vec<_> = streams
        .iter()
        .map(|stream| {
            let stream = Arc::clone(stream);
            thread::spawn(move || {
                let writer = stream.writer().unwrap();
                for _ in 0..1000 {
                    writer.write(&1).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let header = streams[0].header();
    assert_eq!(header.entry_count, 4000);
    assert_eq!(header.last_message, 4000 * 8);
    assert!(header.capacity >= 4000 * 8);

    let reader = streams[3].reader(0).unwrap();
    let sum: i64 = (0..4000).map(|_| reader.read().unwrap()).sum();
    assert_eq!(sum, 4000);
}

proptest::proptest! {
    #![proptest_config(proptest::prelude::ProptestConfig::with_cases(16))]

    #[test]
    fn any_sequence_reads_back(values in proptest::collection::vec(proptest::prelude::any::<u64>(), 0..700)) {
        let dir = tempdir().unwrap();
        let stream: Stream<u64> = Stream::open_with_config(
            "prop",
            None,
            None,
            config(&dir).flush_on_write(false),
        )
        .unwrap();

        let writer = stream.writer().unwrap();
        for value in &values {
            writer.write(value).unwrap();
        }

        let reader = stream.reader(0).unwrap();
        for value in &values {
            proptest::prop_assert_eq!(reader.read().unwrap(), *value);
        }
        proptest::prop_assert_eq!(stream.size(), values.len() as u64);
    }
}
