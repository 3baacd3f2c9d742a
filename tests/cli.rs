use assert_cmd::Command;
use exportdb::FileSignature;
use exportdb::config::{DEFAULT_STORE_NAME, StoreConfig};
use exportdb::storage::schema::SCHEMA_4_3_SQL;
use exportdb::storage::{ExportStateStore, RecordError};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn exportdb() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("exportdb").unwrap();
    cmd.env_remove("EXPORTDB_STORE").env_remove("RUST_LOG").arg("--no-color");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).unwrap()
}

fn json_of(cmd: &mut Command) -> serde_json::Value {
    serde_json::from_str(&stdout_of(cmd.arg("--json"))).unwrap()
}

/// Export tree with two files of one asset and a store describing them.
fn export_tree() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let store_path = populate(dir.path());
    (dir, store_path)
}

fn populate(root: &Path) -> PathBuf {
    std::fs::create_dir_all(root).unwrap();
    let store_path = root.join(DEFAULT_STORE_NAME);
    let store = ExportStateStore::open(&store_path, StoreConfig::default()).unwrap();
    for (name, asset) in [("IMG_0001.JPG", "UUID-A"), ("IMG_0001.mov", "UUID-A"), ("IMG_0002.JPG", "UUID-B")] {
        let file = root.join(name);
        std::fs::write(&file, name.as_bytes()).unwrap();
        store
            .get_or_create_record(name, asset)
            .unwrap()
            .set_destination_signature(Some(FileSignature::from_path(&file).unwrap()))
            .unwrap();
    }
    store.set_metadata_blob_for_asset("UUID-A", "{\"title\":\"Sunset\"}").unwrap();
    store
        .get_record("IMG_0002.JPG")
        .unwrap()
        .unwrap()
        .set_last_error(Some(&RecordError::new("exiftool failed").with_kind("exif")))
        .unwrap();
    store.set_run_config("[export]\nconvert = true\n").unwrap();
    store.close();
    store_path
}

fn write_legacy_store(path: &Path) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(SCHEMA_4_3_SQL).unwrap();
    conn.execute(
        "INSERT INTO version (tool_version, schema_version) VALUES ('0.20.0', '4.3')",
        [],
    )
    .unwrap();
}

fn schema_version_on_disk(path: &Path) -> String {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.query_row("SELECT schema_version FROM version", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn version_reports_schema() {
    let json = json_of(exportdb().arg("version"));
    assert_eq!(json["schema_version"], "8.0");
    assert!(json.get("store").is_none());
}

#[test]
fn version_reads_store_directory() {
    let (dir, _) = export_tree();
    let json = json_of(exportdb().arg("version").arg(dir.path()));
    assert_eq!(json["store"]["schema_version"], "8.0");
}

#[test]
fn migrate_upgrades_legacy_store_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy.db");
    write_legacy_store(&path);

    let dry = stdout_of(exportdb().args(["--dry-run", "migrate"]).arg(&path));
    assert!(dry.contains("Would migrate"), "{dry}");
    assert_eq!(schema_version_on_disk(&path), "4.3");

    let out = stdout_of(exportdb().arg("migrate").arg(&path));
    assert!(out.contains("from version 4.3 to 8.0"), "{out}");

    let again = stdout_of(exportdb().arg("migrate").arg(&path));
    assert!(again.contains("already at latest version"), "{again}");
}

#[test]
fn sql_prints_rows_and_rejects_writes() {
    let (dir, _) = export_tree();
    let rows = json_of(
        exportdb()
            .arg("sql")
            .arg(dir.path())
            .arg("SELECT filepath FROM export_data ORDER BY filepath"),
    );
    assert_eq!(rows.as_array().unwrap().len(), 3);
    assert_eq!(rows[0]["filepath"], "IMG_0001.JPG");

    exportdb()
        .arg("sql")
        .arg(dir.path())
        .arg("DELETE FROM export_data")
        .assert()
        .code(4);
}

#[test]
fn info_shows_record_and_missing_is_not_found() {
    let (dir, _) = export_tree();
    let record = json_of(exportdb().arg("info").arg(dir.path()).arg("img_0001.jpg"));
    assert_eq!(record["asset_id"], "UUID-A");
    assert_eq!(record["raw_path"], "IMG_0001.JPG");

    exportdb()
        .arg("info")
        .arg(dir.path())
        .arg("nope.jpg")
        .assert()
        .code(3);
}

#[test]
fn missing_store_is_not_found() {
    let dir = TempDir::new().unwrap();
    exportdb().arg("errors").arg(dir.path()).assert().code(3);
    assert!(!dir.path().join(DEFAULT_STORE_NAME).exists());
}

#[test]
fn asset_commands() {
    let (dir, _) = export_tree();
    let files = json_of(exportdb().arg("asset-files").arg(dir.path()).arg("UUID-A"));
    let files: Vec<PathBuf> = files
        .as_array()
        .unwrap()
        .iter()
        .map(|f| PathBuf::from(f.as_str().unwrap()))
        .collect();
    assert_eq!(files, vec![dir.path().join("IMG_0001.JPG"), dir.path().join("IMG_0001.mov")]);

    let blob = json_of(exportdb().arg("asset-info").arg(dir.path()).arg("UUID-A"));
    assert_eq!(blob["title"], "Sunset");

    exportdb()
        .arg("asset-info")
        .arg(dir.path())
        .arg("UUID-B")
        .assert()
        .code(3);
}

#[test]
fn delete_asset_honours_dry_run() {
    let (dir, store_path) = export_tree();
    let dry = json_of(exportdb().args(["--dry-run", "delete-asset"]).arg(dir.path()).arg("UUID-A"));
    assert_eq!(dry["deleted"][0]["deleted"], 2);
    assert_eq!(paths_for(&store_path, "UUID-A").len(), 2);

    stdout_of(exportdb().arg("delete-asset").arg(&store_path).arg("UUID-A").arg("UUID-X"));
    assert!(paths_for(&store_path, "UUID-A").is_empty());
    assert_eq!(paths_for(&store_path, "UUID-B").len(), 1);
}

#[test]
fn delete_file_accepts_absolute_paths() {
    let (dir, store_path) = export_tree();
    let json = json_of(
        exportdb()
            .arg("delete-file")
            .arg(dir.path())
            .arg(dir.path().join("IMG_0002.JPG")),
    );
    assert_eq!(json["deleted"][0]["deleted"], 1);
    assert!(paths_for(&store_path, "UUID-B").is_empty());

    exportdb()
        .arg("delete-file")
        .arg(dir.path())
        .arg("/outside/the/root.jpg")
        .assert()
        .code(4);
}

#[test]
fn errors_and_signatures() {
    let (dir, _) = export_tree();
    let errors = json_of(exportdb().arg("errors").arg(dir.path()));
    assert_eq!(errors[0]["path"], "IMG_0002.JPG");
    assert_eq!(errors[0]["error"]["kind"], "exif");

    std::fs::write(dir.path().join("IMG_0001.mov"), b"re-encoded").unwrap();
    let check = json_of(exportdb().arg("check-signatures").arg(dir.path()));
    assert_eq!(check["mismatched"][0], "IMG_0001.mov");
    assert_eq!(check["matched"].as_array().unwrap().len(), 2);

    stdout_of(exportdb().arg("update-signatures").arg(dir.path()));
    let check = json_of(exportdb().arg("check-signatures").arg(dir.path()));
    assert!(check["mismatched"].as_array().unwrap().is_empty());
}

#[test]
fn touch_sets_reference_date() {
    let (dir, _) = export_tree();
    let report = json_of(
        exportdb()
            .arg("touch")
            .arg(dir.path())
            .args(["--date", "2020-09-13T12:26:40Z"]),
    );
    assert_eq!(report["touched"].as_array().unwrap().len(), 3);
    let sig = FileSignature::from_path(&dir.path().join("IMG_0002.JPG")).unwrap();
    assert_eq!(sig.mtime, 1_600_000_000);

    exportdb()
        .arg("touch")
        .arg(dir.path())
        .args(["--date", "someday"])
        .assert()
        .code(4);
}

#[test]
fn save_config_writes_file() {
    let (dir, _) = export_tree();
    let dest = dir.path().join("saved.toml");
    stdout_of(exportdb().arg("save-config").arg(dir.path()).arg(&dest));
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "[export]\nconvert = true\n");
}

#[test]
fn report_without_results() {
    let (dir, _) = export_tree();
    let json = json_of(exportdb().arg("report").arg(dir.path()));
    assert!(json.is_null());
}

#[test]
fn backup_creates_datestamped_copy() {
    let (dir, store_path) = export_tree();
    let json = json_of(exportdb().arg("backup").arg(&store_path));
    let backup = PathBuf::from(json["backup"].as_str().unwrap());
    assert!(backup.exists());
    assert!(backup.starts_with(dir.path()));
    assert_eq!(backup.extension().and_then(|e| e.to_str()), Some("bak"));
}

#[test]
fn json_errors_are_structured() {
    let dir = TempDir::new().unwrap();
    let output = exportdb()
        .args(["--json", "last-run"])
        .arg(dir.path())
        .assert()
        .code(3)
        .get_output()
        .stderr
        .clone();
    let err: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(err["error"]["code"], "NOT_FOUND");
}

fn paths_for(store_path: &Path, asset: &str) -> Vec<String> {
    let store = ExportStateStore::open_existing(store_path, StoreConfig::default().with_record_run(false)).unwrap();
    store.get_paths_for_asset(asset).unwrap()
}

#[test]
fn dry_run_never_upgrades_the_store_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(DEFAULT_STORE_NAME);
    write_legacy_store(&path);
    let saved = dir.path().join("saved.toml");

    let statement = "SELECT COUNT(*) FROM export_data";
    let runs: [(&str, Option<&std::ffi::OsStr>); 8] = [
        ("vacuum", None),
        ("backup", None),
        ("save-config", Some(saved.as_os_str())),
        ("last-run", None),
        ("errors", None),
        ("check-signatures", None),
        ("sql", Some(statement.as_ref())),
        ("version", None),
    ];
    for (command, extra) in runs {
        let mut cmd = exportdb();
        cmd.args(["--dry-run", command]).arg(&path).args(extra);
        cmd.assert().success();
        assert_eq!(schema_version_on_disk(&path), "4.3", "after --dry-run {command}");
    }

    assert!(!saved.exists());
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .filter(|n| n.to_string_lossy().ends_with(".bak"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn relative_store_path_resolves_against_cwd() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().canonicalize().unwrap();
    populate(&base.join("export"));
    let store = Path::new("export").join(DEFAULT_STORE_NAME);

    let record = json_of(
        exportdb()
            .current_dir(&base)
            .arg("info")
            .arg(&store)
            .arg("IMG_0001.JPG"),
    );
    assert_eq!(record["normalized_path"], "img_0001.jpg");

    let files = json_of(exportdb().current_dir(&base).arg("asset-files").arg(&store).arg("UUID-A"));
    assert_eq!(files[0], base.join("export").join("IMG_0001.JPG").display().to_string());

    let deleted = json_of(
        exportdb()
            .current_dir(&base)
            .arg("delete-file")
            .arg(&store)
            .arg(base.join("export").join("IMG_0002.JPG")),
    );
    assert_eq!(deleted["deleted"][0]["deleted"], 1);
    assert!(paths_for(&base.join("export").join(DEFAULT_STORE_NAME), "UUID-B").is_empty());
}
