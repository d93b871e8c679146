mod common;

use profile_harvester::app::{App, ResizeOptions};
use profile_harvester::imaging;
use profile_harvester::shutdown::Shutdown;

use common::{MockEncounters, MockFetcher, RecordingSink, png, temp_store};

#[test]
fn shrinks_large_photos_and_skips_the_rest() {
    let (_temp, store) = temp_store();
    store.ensure_photos_root().unwrap();
    let small = png(100, 50);
    store.put_photo(&"big".parse().unwrap(), &png(2048, 1024)).unwrap();
    store.put_photo(&"corrupt".parse().unwrap(), b"\xff\xd8\xff truncated").unwrap();
    store.put_photo(&"small".parse().unwrap(), &small).unwrap();
    let source = MockEncounters::default();
    let fetcher = MockFetcher::default();
    let sink = RecordingSink::default();
    let app = App::new(store.clone(), &source, &fetcher);

    let result = app
        .resize(&ResizeOptions {
                max: 512,
                quality: imaging::DEFAULT_JPEG_QUALITY,
            }, &Shutdown::new(), &sink)
        .unwrap();

    assert_eq!(result.run.queued, 3);
    assert_eq!(result.run.processed, 1);
    assert_eq!(result.run.skipped, 1);
    assert_eq!(result.run.failed, 1);
    assert_eq!(sink.failures().len(), 1);
    assert!(sink.failures()[0].starts_with("failed for corrupt"));

    let big = store.read_photo(&"big".parse().unwrap()).unwrap();
    assert_eq!(imaging::dimensions(&big).unwrap(), (512, 256));
    assert_eq!(store.read_photo(&"small".parse().unwrap()).unwrap(), small);
    assert!(fetcher.calls().is_empty());
}
