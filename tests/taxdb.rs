use std::fs;
use std::io::Write;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::write::GzEncoder;

use kira_taxonomy::app::NoopProgress;
use kira_taxonomy::domain::TaxonId;
use kira_taxonomy::error::KiraError;
use kira_taxonomy::taxdb::{PopulateOptions, TaxIdDb};

const SOURCE: &str = "accession\taccession.version\ttaxid\tgi\n\
    A00002\tA00002.1\t9913\t2\n\
    A00003\tA00003.1\t9913\t3\n\
    X17276\tX17276.1\t9646\t4\n";

fn temp_path(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
}

#[test]
fn populated_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = temp_path(&dir, "taxids.db");

    {
        let mut db = TaxIdDb::create(&db_path).unwrap();
        db.populate(SOURCE.as_bytes(), &PopulateOptions::default(), &NoopProgress)
            .unwrap();
    }

    let mut db = TaxIdDb::open(&db_path).unwrap();
    assert!(db.is_populated());
    assert_eq!(db.lookup("A00003.1").unwrap(), Some(TaxonId::new(9913)));
    assert_matches!(
        db.populate(SOURCE.as_bytes(), &PopulateOptions::default(), &NoopProgress)
            .unwrap_err(),
        KiraError::AlreadyPopulated
    );
}

#[test]
fn create_discards_previous_rows() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = temp_path(&dir, "taxids.db");
    {
        let mut db = TaxIdDb::create(&db_path).unwrap();
        db.populate(SOURCE.as_bytes(), &PopulateOptions::default(), &NoopProgress)
            .unwrap();
    }
    let db = TaxIdDb::create(&db_path).unwrap();
    assert!(!db.is_populated());
    assert_eq!(db.row_count().unwrap(), 0);
}

#[test]
fn open_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert_matches!(
        TaxIdDb::open(&temp_path(&dir, "absent.db")),
        Err(KiraError::Filesystem(_))
    );
    assert!(!dir.path().join("absent.db").exists());
}

#[test]
fn forced_repopulation_is_idempotent() {
    let accessions = ["A00002.1", "A00003.1", "X17276.1", "MissingAccn"];

    let mut once = TaxIdDb::open_in_memory().unwrap();
    once.populate(SOURCE.as_bytes(), &PopulateOptions::default(), &NoopProgress)
        .unwrap();

    let mut twice = TaxIdDb::open_in_memory().unwrap();
    let forced = PopulateOptions {
        force: true,
        chunk_size: 2,
    };
    twice.populate(SOURCE.as_bytes(), &forced, &NoopProgress).unwrap();
    twice.populate(SOURCE.as_bytes(), &forced, &NoopProgress).unwrap();

    assert_eq!(
        once.lookup_many(&accessions).unwrap(),
        twice.lookup_many(&accessions).unwrap()
    );
    assert_eq!(twice.row_count().unwrap(), 3);
}

#[test]
fn populate_from_gzip_source() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = temp_path(&dir, "nucl_gb.accession2taxid.gz");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(SOURCE.as_bytes()).unwrap();
    fs::write(source_path.as_std_path(), encoder.finish().unwrap()).unwrap();

    let mut db = TaxIdDb::open_in_memory().unwrap();
    let summary = db
        .populate_from_path(&source_path, &PopulateOptions::default(), &NoopProgress)
        .unwrap();
    assert_eq!(summary.rows_read, 3);
    assert_eq!(summary.chunks_committed, 1);
    assert_eq!(
        db.lookup_many(&["X17276.1", "Z00000.1"]).unwrap(),
        vec![Some(TaxonId::new(9646)), None]
    );
}

#[test]
fn populate_from_plain_source() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = temp_path(&dir, "nucl_gb.accession2taxid");
    fs::write(source_path.as_std_path(), SOURCE).unwrap();

    let mut db = TaxIdDb::open_in_memory().unwrap();
    db.populate_from_path(&source_path, &PopulateOptions::default(), &NoopProgress)
        .unwrap();
    assert_eq!(db.lookup("A00002.1").unwrap(), Some(TaxonId::new(9913)));
}

#[test]
fn short_row_is_rejected() {
    let source = "accession\taccession.version\ttaxid\tgi\nA00002\tA00002.1\n";
    let mut db = TaxIdDb::open_in_memory().unwrap();
    let err = db
        .populate(source.as_bytes(), &PopulateOptions::default(), &NoopProgress)
        .unwrap_err();
    assert_matches!(err, KiraError::SourceRow { .. });
}

#[test]
fn debug_output_reports_populated_state() {
    let mut db = TaxIdDb::open_in_memory().unwrap();
    assert!(format!("{db:?}").contains("populated: false"));
    db.populate(SOURCE.as_bytes(), &PopulateOptions::default(), &NoopProgress)
        .unwrap();
    assert!(format!("{db:?}").contains("populated: true"));
}
