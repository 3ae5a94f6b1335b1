use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use indexlib::index::DocId;
use indexlib::index::bitmap::{
    BitmapIndexReader, BitmapIndexWriter, BitmapPosting, BitmapPostingWriter, InMemBitmapDecoder,
};
use indexlib::storage::memory::{MemoryStorage, MemoryStorageConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn write_posting(doc_ids: &[DocId]) -> (BitmapPostingWriter, Vec<u8>) {
    let mut writer = BitmapPostingWriter::new();
    for &doc_id in doc_ids {
        writer.add_position();
        writer.end_document(doc_id, 0);
    }
    let mut bytes = Vec::new();
    let written = writer.dump(&mut bytes).unwrap();
    assert_eq!(written, bytes.len());
    (writer, bytes)
}

#[test]
fn test_random_round_trips() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..50 {
        let mut doc_ids = Vec::new();
        let mut next: DocId = rng.random_range(0..40);
        for _ in 0..rng.random_range(1..200) {
            doc_ids.push(next);
            next += rng.random_range(1..70);
        }

        let (writer, bytes) = write_posting(&doc_ids);
        assert_eq!(bytes.len(), writer.dump_length());

        let posting = BitmapPosting::decode(&bytes).unwrap();
        assert_eq!(posting.doc_freq() as usize, doc_ids.len());
        assert_eq!(posting.last_doc_id(), doc_ids.last().copied());
        assert_eq!(posting.doc_ids().collect::<Vec<_>>(), doc_ids);
    }
}

#[test]
fn test_seek_over_dumped_posting() {
    let (_, bytes) = write_posting(&[1, 2, 7]);
    let posting = BitmapPosting::decode(&bytes).unwrap();

    assert!(!posting.test(3));
    assert!(posting.test(7));
    assert_eq!(posting.seek(3), Some(7));
    assert_eq!(posting.seek(8), None);
}

#[test]
fn test_index_files_round_trip() {
    let storage = MemoryStorage::new(MemoryStorageConfig::default());
    let mut writer = BitmapIndexWriter::new();
    let docs = ["red", "blue", "red", "green", "blue", "red"];
    for (doc_id, term) in docs.iter().enumerate() {
        writer.add_token(term);
        writer.end_document(doc_id as DocId);
    }
    writer.dump(&storage).unwrap();

    let reader = BitmapIndexReader::open(&storage).unwrap();
    assert_eq!(reader.term_count(), 3);
    assert_eq!(reader.terms().collect::<Vec<_>>(), vec!["blue", "green", "red"]);
    let red = reader.lookup("red").unwrap().unwrap();
    assert_eq!(red.doc_ids().collect::<Vec<_>>(), vec![0, 2, 5]);
    assert!(reader.lookup("purple").unwrap().is_none());
}

#[test]
fn test_snapshots_while_writer_grows() {
    const DOCS: DocId = 20_000;

    let mut writer = BitmapIndexWriter::new();
    writer.add_token("even");
    writer.end_document(0);
    let state = writer.posting_state("even").unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let reader_done = Arc::clone(&done);
    let reader = thread::spawn(move || {
        let mut snapshots = 0;
        loop {
            let finished = reader_done.load(Ordering::Acquire);
            let decoder = InMemBitmapDecoder::init(&state);
            let doc_ids: Vec<DocId> = decoder.posting().doc_ids().collect();
            assert!(doc_ids.len() as u32 >= decoder.doc_freq());
            assert!(doc_ids.iter().all(|&d| d < decoder.item_count() && d % 2 == 0));
            // every counted document is visible
            for i in 0..decoder.doc_freq() {
                assert!(decoder.test(i * 2));
            }
            snapshots += 1;
            if finished {
                break snapshots;
            }
        }
    });

    for doc_id in 1..DOCS {
        if doc_id % 2 == 0 {
            writer.add_token("even");
        }
        writer.end_document(doc_id);
    }
    done.store(true, Ordering::Release);
    assert!(reader.join().unwrap() > 0);

    let final_state = writer.posting_state("even").unwrap();
    let decoder = InMemBitmapDecoder::init(&final_state);
    assert_eq!(decoder.doc_freq(), DOCS / 2);
}
