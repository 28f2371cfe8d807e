//! Configuration load errors, validation atomicity and starter scaffold.

use agency_core::config::{self, Agency, DEFAULT_CONFIG_FILE};
use agency_core::{ConfigError, GraphError, RegistryError, RoleRegistry};
use assert_fs::prelude::*;
use predicates::prelude::predicate;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child(DEFAULT_CONFIG_FILE);
    file.write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains(DEFAULT_CONFIG_FILE), "got: {err}");
}

#[test]
fn load_wrong_shape_returns_parse_error() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child(DEFAULT_CONFIG_FILE);
    file.write_str("- this is a list, not a mapping\n").expect("write");
    assert!(matches!(
        config::load_at(file.path()),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn cycle_in_config_is_fatal() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child(DEFAULT_CONFIG_FILE);
    file.write_str(
        r#"
name: loop
roles:
  - { name: a, owned_paths: ["a/"] }
  - { name: b, owned_paths: ["b/"] }
edges:
  - { from: a, to: b }
  - { from: b, to: a }
"#,
    )
    .expect("write");

    let err = Agency::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Graph(GraphError::Cycle { .. })), "got: {err}");
    assert!(err.to_string().contains("b -> a -> b"), "got: {err}");
}

#[test]
fn edge_to_undeclared_role_is_fatal() {
    let mut cfg = config::sample_config("ghosts");
    cfg.edges.push(agency_core::EdgeSpec {
        from: "test".into(),
        to: "release".into(),
    });
    assert!(matches!(
        Agency::build(cfg),
        Err(ConfigError::Graph(GraphError::UnknownRole { .. }))
    ));
}

// ---------------------------------------------------------------------------
// 2. Ownership conflicts (registration is atomic)
// ---------------------------------------------------------------------------

#[test]
fn overlapping_claim_is_rejected_and_registry_unchanged() {
    let mut reg = RoleRegistry::new();
    reg.register("build".into(), &["src/**"]).expect("build");
    reg.register("write_docs".into(), &["docs/**"]).expect("docs");

    let err = reg
        .register("readme".into(), &["README.md", "src/readme.md"])
        .unwrap_err();
    assert!(matches!(err, RegistryError::OwnershipConflict { .. }), "got: {err}");

    assert_eq!(reg.len(), 2);
    assert!(!reg.contains("readme"));
    assert_eq!(reg.owner_of("README.md"), None);
    assert_eq!(reg.owner_of("src/readme.md").map(|r| r.as_str()), Some("build"));
}

#[test]
fn overlapping_config_names_both_patterns() {
    let mut cfg = config::sample_config("clash");
    cfg.roles[5].owned_paths.push("src/tests/**".to_string());
    let err = Agency::build(cfg).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("src/tests/**"), "got: {msg}");
    assert!(msg.contains("'build'"), "got: {msg}");
}

// ---------------------------------------------------------------------------
// 3. Save / scaffold
// ---------------------------------------------------------------------------

#[test]
fn save_creates_parent_dirs_and_leaves_no_tmp() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let nested = dir.child("nested/deeper").child(DEFAULT_CONFIG_FILE);
    config::save_at(nested.path(), &config::sample_config("starter")).expect("save");

    nested.assert(predicate::path::exists());
    nested.assert(predicate::str::contains("name: starter"));
    dir.child("nested/deeper/agency.yaml.tmp")
        .assert(predicate::path::missing());
}

#[test]
fn saved_starter_reloads_as_valid_agency() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child(DEFAULT_CONFIG_FILE);
    config::save_at(file.path(), &config::sample_config("starter")).expect("save");

    let agency = Agency::load(file.path()).expect("valid");
    assert_eq!(agency.name, "starter");
    assert_eq!(agency.graph.waves().len(), 4);
    assert_eq!(agency.registry.owner_of("tools/fetch.py").map(|r| r.as_str()), Some("tools"));
}
