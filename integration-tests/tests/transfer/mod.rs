use dbferry_core::{
    config::Endpoint,
    migrate::ErrorKind,
    tool::Tools,
    transfer::{export_database, import_database},
};
use integration_tests::Workdir;
use std::{fs::File, io::Write as _};

fn tools_for(workdir: &Workdir) -> Tools {
    let bin = workdir.bin();
    Tools {
        dump: bin.clone(),
        convert: bin.clone(),
        load: bin.clone(),
        restore: bin,
        ping: None,
    }
}

#[tokio::test]
async fn export_should_dump_and_pack_the_archive() {
    let workdir = Workdir::new().with_touch(&[
        "--out:shop/users.bson",
        "--out:shop/users.metadata.json",
    ]);
    let archive_dir = tempfile::TempDir::new().unwrap();
    let archive = archive_dir.path().join("shop.zip");

    export_database(
        &tools_for(&workdir),
        &Endpoint::new("db://src", "shop"),
        &archive,
    )
    .await
    .unwrap();

    let args = workdir.args();
    let args = args.get();
    assert_eq!(&args[..2], &["--uri=db://src", "--db=shop"]);
    assert!(args[2].starts_with("--out="));

    let zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
    let names: Vec<_> = zip.file_names().collect();
    assert!(names.contains(&"shop/users.bson"));
    assert!(names.contains(&"shop/users.metadata.json"));
}

#[tokio::test]
async fn export_should_surface_a_failing_dump_as_a_stage_error() {
    let workdir = Workdir::new().with_exit_status(2);
    let archive_dir = tempfile::TempDir::new().unwrap();

    let result = export_database(
        &tools_for(&workdir),
        &Endpoint::new("db://src", "shop"),
        &archive_dir.path().join("shop.zip"),
    )
    .await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Stage);
}

#[tokio::test]
async fn import_should_extract_and_restore_under_the_destination_name() {
    let workdir = Workdir::new();
    let archive_dir = tempfile::TempDir::new().unwrap();
    let archive = archive_dir.path().join("shop.zip");
    let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
    zip.start_file("shop/users.bson", zip::write::FileOptions::default())
        .unwrap();
    zip.write_all(b"users").unwrap();
    zip.finish().unwrap();

    import_database(
        &tools_for(&workdir),
        &archive,
        &Endpoint::new("db://dst", "shop_copy"),
    )
    .await
    .unwrap();

    let args = workdir.args();
    let args = args.get();
    assert_eq!(args.len(), 3);
    assert_eq!(&args[..2], &["--uri=db://dst", "--nsTo=shop_copy.*"]);
}

#[tokio::test]
async fn import_should_fail_for_a_missing_archive() {
    let workdir = Workdir::new();
    let archive_dir = tempfile::TempDir::new().unwrap();

    let result = import_database(
        &tools_for(&workdir),
        &archive_dir.path().join("missing.zip"),
        &Endpoint::new("db://dst", "shop_copy"),
    )
    .await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Internal);
    // the restore tool must not run when extraction failed
    assert!(workdir.invocations().is_empty());
}
