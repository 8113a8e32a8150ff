//! End-to-end resolution tests: definition files on disk through
//! `read_targets` to engine-facing build options.

use forge_core::{compat, read_targets, File, ForgeError, Platform};
use std::collections::BTreeMap;
use std::path::Path;

fn file_on_disk(path: &Path) -> File {
    File {
        name: path.display().to_string(),
        data: std::fs::read_to_string(path).unwrap(),
    }
}

fn basename(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().to_string()
}

#[test]
fn test_legacy_compose_project_resolves_end_to_end() {
    let project = tempfile::tempdir().unwrap();
    let app_dir = project.path().join("app");
    std::fs::create_dir_all(&app_dir).unwrap();
    std::fs::write(
        app_dir.join("Dockerfile.template"),
        "FROM base-%%BALENA_ARCH%%\nLABEL machine=%%BALENA_MACHINE_NAME%%\nLABEL service=%%BALENA_SERVICE_NAME%%\n",
    )
    .unwrap();

    let compose_path = project.path().join("docker-compose.yml");
    std::fs::write(
        &compose_path,
        "version: \"2.1\"\nservices:\n  app:\n    build:\n      context: ./app\n  proxy:\n    image: nginx\n",
    )
    .unwrap();

    let files = vec![file_on_disk(&compose_path)];
    let overrides =
        vec!["app.platform=linux/arm/v7".to_string(), "app.args.EXTRA=1".to_string()];

    let table = read_targets(
        &files,
        &["default".to_string()],
        &overrides,
        &BTreeMap::new(),
    )
    .unwrap();

    // The image-only service is not buildable.
    assert_eq!(table.len(), 1);
    let app = &table["app"];

    assert_eq!(app.tags, vec![format!("{}_app", basename(project.path()))]);
    assert_eq!(app.args["EXTRA"], "1");

    let body = app.dockerfile_inline.as_deref().expect("template should be inlined");
    assert!(body.contains("FROM base-armv7hf"));
    assert!(body.contains("machine=raspberrypi3"));
    assert!(body.contains("service=app"));
    assert_eq!(app.dockerfile, None);

    // Engine-facing options carry the derived platform and token args.
    let mut options = forge_core::to_build_options(&table).unwrap();
    compat::resolve_build_options(&mut options, &table).unwrap();

    let opts = &options["app"];
    assert_eq!(opts.args["BALENA_ARCH"], "armv7hf");
    assert_eq!(opts.args["BALENA_MACHINE_NAME"], "raspberrypi3");
    assert_eq!(opts.args["BALENA_SERVICE_NAME"], "app");
    assert!(opts.platforms.contains(&Platform::parse("linux/arm/v7").unwrap()));
    assert_eq!(opts.dockerfile, "");
    assert!(opts.dockerfile_inline.is_some());
}

#[test]
fn test_fleet_metadata_merged_into_targets() {
    let project = tempfile::tempdir().unwrap();
    let app_dir = project.path().join("app");
    std::fs::create_dir_all(&app_dir).unwrap();
    std::fs::write(app_dir.join("Dockerfile.template"), "FROM scratch\n").unwrap();

    std::fs::create_dir_all(project.path().join(".balena")).unwrap();
    std::fs::write(
        project.path().join(".balena/balena.yml"),
        "build-variables:\n  global:\n    - FLEET=prod\n  services:\n    app:\n      - MODE=fast\n",
    )
    .unwrap();

    let compose_path = project.path().join("docker-compose.yml");
    std::fs::write(
        &compose_path,
        "version: \"2\"\nservices:\n  app:\n    build:\n      context: ./app\n",
    )
    .unwrap();

    let files = vec![file_on_disk(&compose_path)];
    let table = read_targets(
        &files,
        &["default".to_string()],
        &["app.platform=linux/amd64".to_string()],
        &BTreeMap::new(),
    )
    .unwrap();

    let app = &table["app"];
    assert_eq!(app.args["FLEET"], "prod");
    assert_eq!(app.args["MODE"], "fast");
}

#[test]
fn test_mixed_file_set_keeps_native_targets() {
    let project = tempfile::tempdir().unwrap();
    let app_dir = project.path().join("app");
    std::fs::create_dir_all(&app_dir).unwrap();
    std::fs::write(app_dir.join("Dockerfile.template"), "FROM scratch\n").unwrap();

    let native_path = project.path().join("forge-bake.yml");
    std::fs::write(
        &native_path,
        "target:\n  tool:\n    context: ./tool\n    dockerfile: Dockerfile\n    platforms: [linux/amd64]\n",
    )
    .unwrap();

    let compose_path = project.path().join("docker-compose.yml");
    std::fs::write(
        &compose_path,
        "version: \"2.1\"\nservices:\n  app:\n    build:\n      context: ./app\n",
    )
    .unwrap();

    let files = vec![file_on_disk(&native_path), file_on_disk(&compose_path)];
    let table = read_targets(
        &files,
        &["tool".to_string(), "default".to_string()],
        &["app.platform=linux/amd64".to_string()],
        &BTreeMap::new(),
    )
    .unwrap();

    // The legacy fallback must not lose targets the primary parser handled.
    assert_eq!(table.len(), 2);
    assert!(table.contains_key("tool"));
    assert!(table.contains_key("app"));

    // The explicitly-named build file skips the template rewrite.
    assert_eq!(table["tool"].dockerfile.as_deref(), Some("Dockerfile"));
    assert!(table["tool"].dockerfile_inline.is_none());
}

#[test]
fn test_template_missing_fails_with_context_dir() {
    let project = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(project.path().join("app")).unwrap();

    let compose_path = project.path().join("docker-compose.yml");
    std::fs::write(
        &compose_path,
        "version: \"2\"\nservices:\n  app:\n    build:\n      context: ./app\n",
    )
    .unwrap();

    let files = vec![file_on_disk(&compose_path)];
    let err = read_targets(
        &files,
        &["default".to_string()],
        &["app.platform=linux/amd64".to_string()],
        &BTreeMap::new(),
    )
    .unwrap_err();

    match err {
        ForgeError::TemplateNotFound { context_dir, .. } => {
            assert!(context_dir.display().to_string().contains("app"));
        }
        other => panic!("expected TemplateNotFound, got {other}"),
    }
}

#[test]
fn test_unknown_request_name_is_error() {
    let files = vec![File {
        name: "forge-bake.yml".to_string(),
        data: "target:\n  app:\n    context: .\n    dockerfile: Dockerfile\n".to_string(),
    }];
    let err = read_targets(&files, &["ghost".to_string()], &[], &BTreeMap::new()).unwrap_err();
    assert!(matches!(err, ForgeError::UnknownTarget { .. }));
}

#[test]
fn test_unsupported_version_without_legacy_name_surfaces() {
    // A 2.x document under a non-legacy file name must not be recovered.
    let files = vec![File {
        name: "stack.yml".to_string(),
        data: "version: \"2.1\"\nservices:\n  app:\n    build: .\n".to_string(),
    }];
    let err = read_targets(&files, &["default".to_string()], &[], &BTreeMap::new()).unwrap_err();
    assert!(matches!(err, ForgeError::UnsupportedSchemaVersion { .. }));
}
