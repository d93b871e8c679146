mod common;

use assert_matches::assert_matches;

use profile_harvester::app::{App, DownloadOptions, ImportOptions, NullSink};
use profile_harvester::domain::{Processing, QueueOrder};
use profile_harvester::error::HarvestError;
use profile_harvester::imaging::{self, IMPORT_JPEG_QUALITY};
use profile_harvester::shutdown::Shutdown;

use common::{MockEncounters, MockFetcher, RecordingSink, png, profile_with_photos, temp_store};

const DUMP: &str = r#"{"user_id":"u1","albums":[{"photos":[
    {"id":"a","large_url":"//x/a.jpg"},
    {"id":"b","large_url":"//x/b.jpg"},
    {"id":"c","large_url":"//x/c.jpg"}]}]}
{"name":"no id"}
{"user_id":"u2","albums":[{"photos":[{"id":"d","large_url":"//x/d.jpg"}]}]} {"user_id":"u1"}
"#;

fn thumbnails() -> ImportOptions {
    ImportOptions {
        download: Some(DownloadOptions {
            order: QueueOrder::Sequential,
            per_profile_limit: Some(2),
            processing: Processing::Thumbnail {
                max: 512,
                quality: IMPORT_JPEG_QUALITY,
            },
            ..DownloadOptions::default()
        }),
    }
}

#[test]
fn imports_each_user_once() {
    let (_temp, store) = temp_store();
    let source = MockEncounters::default();
    let fetcher = MockFetcher::default();
    let sink = RecordingSink::default();
    let app = App::new(store.clone(), &source, &fetcher);

    let result = app
        .import(DUMP.as_bytes(), &ImportOptions::default(), &Shutdown::new(), &sink)
        .unwrap();

    assert_eq!(result.records, 4);
    assert_eq!(result.new_profiles, 2);
    assert_eq!(result.existing_profiles, 1);
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].id, "record 2");
    assert_eq!(sink.failures().len(), 1);
    assert!(result.photos.is_none());
    assert!(fetcher.calls().is_empty());

    // the later duplicate record does not replace the first one
    let u1 = store.read_profile(&"u1".parse().unwrap()).unwrap();
    assert_eq!(u1.photo_ids(), vec!["a", "b", "c"]);
}

#[test]
fn import_fetches_first_photos_of_imported_users_only() {
    let (_temp, store) = temp_store();
    assert!(
        store
            .put_profile_if_absent(&profile_with_photos("u9", &["z"]))
            .unwrap()
    );
    let source = MockEncounters::default();
    let mut fetcher = MockFetcher::default();
    for id in ["a", "b", "c", "d"] {
        fetcher
            .bodies
            .insert(format!("https://x/{id}.jpg"), png(1024, 768));
    }
    let app = App::new(store.clone(), &source, &fetcher);

    let result = app
        .import(DUMP.as_bytes(), &thumbnails(), &Shutdown::new(), &NullSink)
        .unwrap();

    assert_eq!(
        fetcher.calls(),
        vec!["https://x/a.jpg", "https://x/b.jpg", "https://x/d.jpg"]
    );
    let photos = result.photos.unwrap();
    assert_eq!(photos.processed, 3);
    assert_eq!(photos.deferred, 1);
    let a = store.read_photo(&"a".parse().unwrap()).unwrap();
    assert_eq!(imaging::dimensions(&a).unwrap(), (512, 384));
    assert!(!store.photo_exists(&"z".parse().unwrap()));
}

#[test]
fn syntax_error_stops_the_import_keeping_earlier_records() {
    let (_temp, store) = temp_store();
    let source = MockEncounters::default();
    let fetcher = MockFetcher::default();
    let app = App::new(store.clone(), &source, &fetcher);
    let input = "{\"user_id\":\"u1\"}\n{oops\n{\"user_id\":\"u2\"}\n";

    let err = app
        .import(input.as_bytes(), &thumbnails(), &Shutdown::new(), &NullSink)
        .unwrap_err();

    assert_matches!(err, HarvestError::ImportParse { line: 2, .. });
    assert!(store.profile_exists(&"u1".parse().unwrap()));
    assert!(!store.profile_exists(&"u2".parse().unwrap()));
    assert!(fetcher.calls().is_empty());
}
