use chrono::Utc;
use neurostim::config::SessionConfig;
use neurostim::core::{SampleMatrix, StimulusRef};
use neurostim::hal::SampleFormat;
use neurostim::store::{
    AttrValue, PersistentStore, SessionMetadata, StoreOptions, StoreReader, TrialAnnotation,
};
use neurostim::SessionError;
use tempfile::tempdir;

const CHANNELS: usize = 3;

fn metadata(format: SampleFormat) -> SessionMetadata {
    let mut config = SessionConfig::default();
    config.sample_format = format;
    config.device.n_channels_total = CHANNELS;
    config.device.eeg_channels = vec![0, 1];
    config.device.marker_channel = 2;
    config.device.channel_mapping.insert("Fz".to_string(), 0);
    config.device.channel_mapping.insert("Cz".to_string(), 1);
    SessionMetadata::from_config(&config, Utc::now())
}

/// Values encode (channel, absolute timestep) so concatenation order is checkable
fn block(start: usize, len: usize) -> SampleMatrix {
    let channels = (0..CHANNELS)
        .map(|ch| (start..start + len).map(|t| (ch * 100_000 + t) as f64).collect())
        .collect();
    SampleMatrix::from_channels(channels).unwrap()
}

fn small_chunks() -> StoreOptions {
    StoreOptions {
        chunk_timesteps: 7,
        ..StoreOptions::default()
    }
}

#[test]
fn test_appends_read_back_in_call_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.nst");

    let mut store =
        PersistentStore::open_with(&path, &metadata(SampleFormat::F64), CHANNELS, small_chunks())
            .unwrap();

    let sizes = [3, 10, 1, 0, 25];
    let mut expected = SampleMatrix::new(CHANNELS);
    let mut t = 0;
    for k in sizes {
        let frames = block(t, k);
        store.append(&frames).unwrap();
        expected.extend(&frames).unwrap();
        t += k;
    }
    assert_eq!(store.timesteps(), 39);
    store.close().unwrap();

    let reader = StoreReader::open(&path).unwrap();
    assert!(reader.is_finalized());
    assert!(!reader.recovered());
    assert_eq!(reader.channel_count(), CHANNELS);
    assert_eq!(reader.timesteps(), 39);
    assert_eq!(reader.samples(), &expected);
}

#[test]
fn test_f32_store_round_trips_integral_values() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.nst");

    let mut store = PersistentStore::open(&path, &metadata(SampleFormat::F32), CHANNELS).unwrap();
    store.append(&block(0, 2000)).unwrap();
    store.close().unwrap();

    let reader = StoreReader::open(&path).unwrap();
    assert_eq!(reader.format(), SampleFormat::F32);
    assert_eq!(reader.samples(), &block(0, 2000));
}

#[test]
fn test_wrong_channel_count_is_write_error() {
    let dir = tempdir().unwrap();
    let mut store = PersistentStore::open(
        dir.path().join("session.nst"),
        &metadata(SampleFormat::F64),
        CHANNELS,
    )
    .unwrap();

    let narrow = SampleMatrix::from_channels(vec![vec![0.0; 4]; 2]).unwrap();
    let err = store.append(&narrow).unwrap_err();
    assert!(matches!(err, SessionError::StoreWrite(_)));
    assert_eq!(store.timesteps(), 0);
}

#[test]
fn test_exclusive_create_refuses_existing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.nst");
    std::fs::write(&path, b"previous session").unwrap();

    let err = PersistentStore::open(&path, &metadata(SampleFormat::F64), CHANNELS).unwrap_err();
    assert!(matches!(err, SessionError::StoreCreate { .. }));

    // Untouched
    assert_eq!(std::fs::read(&path).unwrap(), b"previous session");
}

#[test]
fn test_unwritable_path_is_create_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("missing").join("session.nst");

    let err = PersistentStore::open(&path, &metadata(SampleFormat::F64), CHANNELS).unwrap_err();
    assert!(matches!(err, SessionError::StoreCreate { .. }));
}

#[test]
fn test_header_attributes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.nst");
    PersistentStore::open(&path, &metadata(SampleFormat::F64), CHANNELS)
        .unwrap()
        .close()
        .unwrap();

    let reader = StoreReader::open(&path).unwrap();
    assert_eq!(reader.timesteps(), 0);
    assert_eq!(reader.attribute("marker_channel"), Some(&AttrValue::Int(2)));
    assert_eq!(
        reader.attribute("dtype").and_then(AttrValue::as_text),
        Some("float64")
    );
    assert_eq!(
        reader.attribute("stim_start_marker").and_then(AttrValue::as_float),
        Some(1.0)
    );

    let mapping = reader.channel_mapping().unwrap();
    assert_eq!(mapping.get("Cz"), Some(&1));
}

#[test]
fn test_annotations_follow_their_samples() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.nst");
    let mut store =
        PersistentStore::open_with(&path, &metadata(SampleFormat::F64), CHANNELS, small_chunks())
            .unwrap();

    for trial in 0..3 {
        let start = store.timesteps();
        store.append(&block(start as usize, 5)).unwrap();
        store
            .annotate(&TrialAnnotation {
                block: 0,
                trial,
                stimulus: StimulusRef::Cached { trial },
                visits: Vec::new(),
                sample_start: start,
                sample_count: 5,
                stimulus_start: None,
                stimulus_count: None,
            })
            .unwrap();
    }
    store.close().unwrap();

    let reader = StoreReader::open(&path).unwrap();
    let starts: Vec<u64> = reader.trials().iter().map(|t| t.sample_start).collect();
    assert_eq!(starts, vec![0, 5, 10]);
    assert_eq!(reader.timesteps(), 15);
}

#[test]
fn test_dropped_store_is_finalized() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.nst");
    {
        let mut store =
            PersistentStore::open(&path, &metadata(SampleFormat::F64), CHANNELS).unwrap();
        store.append(&block(0, 12)).unwrap();
    }

    let reader = StoreReader::open(&path).unwrap();
    assert!(reader.is_finalized());
    assert_eq!(reader.timesteps(), 12);
}

#[test]
fn test_unfinalized_store_is_recovered() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.nst");

    let mut store =
        PersistentStore::open_with(&path, &metadata(SampleFormat::F64), CHANNELS, small_chunks())
            .unwrap();
    store.append(&block(0, 9)).unwrap();
    store
        .annotate(&TrialAnnotation {
            block: 0,
            trial: 0,
            stimulus: StimulusRef::Cached { trial: 0 },
            visits: Vec::new(),
            sample_start: 0,
            sample_count: 9,
            stimulus_start: None,
            stimulus_count: None,
        })
        .unwrap();
    // Still buffered when the process "dies"
    store.append(&block(9, 3)).unwrap();
    std::mem::forget(store);

    // A write cut off mid chunk header
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.extend_from_slice(&0x4B4E_4843u32.to_le_bytes());
    bytes.push(1);
    std::fs::write(&path, &bytes).unwrap();

    let reader = StoreReader::open(&path).unwrap();
    assert!(!reader.is_finalized());
    assert!(reader.recovered());
    assert_eq!(reader.samples(), &block(0, 9));
    assert_eq!(reader.trials().len(), 1);
}
