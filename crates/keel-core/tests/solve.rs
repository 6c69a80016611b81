//! End-to-end solver scenarios against an in-memory package universe.

mod common;

use common::{assert_pinned, c, hosted_range, root, v, Universe};
use keel_core::manifest::Manifest;
use keel_core::solver::SolveMode;
use keel_core::source::Source as _;
use keel_core::source::{HostedSource, PathSource};
use keel_core::{ExitStatus, Lockfile, SolveError};
use keel_schema::{FeatureName, PackageName, MANIFEST_FILE};

#[tokio::test]
async fn test_trivial_resolution_picks_newest_allowed() {
    let mut universe = Universe::new();
    universe
        .publish("foo", "1.0.0", &[])
        .publish("foo", "1.1.0", &[])
        .publish("foo", "2.0.0", &[]);

    let lock = universe.solve(&root("app", &[("foo", "^1.0.0")])).await.unwrap();
    assert_eq!(lock.len(), 1);
    assert_pinned(&lock, "foo", "1.1.0");
}

#[tokio::test]
async fn test_backtrack_rules_out_newest_on_shared_dependency() {
    let mut universe = Universe::new();
    universe
        .publish("a", "1.0.0", &[("c", "^1.0.0")])
        .publish("a", "2.0.0", &[("c", "^2.0.0")])
        .publish("b", "1.0.0", &[("c", "^1.0.0")])
        .publish("c", "1.0.0", &[])
        .publish("c", "2.0.0", &[]);

    let lock = universe
        .solve(&root("app", &[("a", "any"), ("b", "any")]))
        .await
        .unwrap();
    assert_pinned(&lock, "a", "1.0.0");
    assert_pinned(&lock, "b", "1.0.0");
    assert_pinned(&lock, "c", "1.0.0");
}

#[tokio::test]
async fn test_unsatisfiable_names_every_culprit() {
    let mut universe = Universe::new();
    universe
        .publish("a", "1.0.0", &[("c", "^1.0.0")])
        .publish("b", "1.0.0", &[("c", "^2.0.0")])
        .publish("c", "1.0.0", &[])
        .publish("c", "2.0.0", &[]);

    let err = universe
        .solve(&root("app", &[("a", "^1.0.0"), ("b", "^1.0.0")]))
        .await
        .unwrap_err();

    let SolveError::Unsatisfiable(report) = &err else {
        panic!("expected unsatisfiable, got {err}");
    };
    assert_eq!(report.package(), &PackageName::new("c"));
    let text = err.to_string();
    assert!(text.contains("a 1.0.0 depends on c"), "bad report: {text}");
    assert!(text.contains("b 1.0.0 depends on c"), "bad report: {text}");
    assert!(text.contains("no version of c"), "bad report: {text}");
    assert_eq!(err.exit_status(), ExitStatus::Data);
}

#[tokio::test]
async fn test_get_honors_lockfile_pin() {
    let mut universe = Universe::new();
    universe
        .publish("foo", "1.0.0", &[])
        .publish("foo", "1.1.0", &[])
        .publish("foo", "2.0.0", &[]);

    let manifest = root("app", &[("foo", "^1.0.0")]);
    let pinned = universe.solve(&root("app", &[("foo", "1.0.0")])).await.unwrap();
    assert_pinned(&pinned, "foo", "1.0.0");

    let lock = universe
        .solve_with(&manifest, Some(&pinned), SolveMode::Get, &[])
        .await
        .unwrap();
    assert_pinned(&lock, "foo", "1.0.0");
}

#[tokio::test]
async fn test_upgrade_ignores_lockfile_pin() {
    let mut universe = Universe::new();
    universe
        .publish("foo", "1.0.0", &[])
        .publish("foo", "1.1.0", &[])
        .publish("foo", "2.0.0", &[]);

    let manifest = root("app", &[("foo", "^1.0.0")]);
    let pinned = universe.solve(&root("app", &[("foo", "1.0.0")])).await.unwrap();

    let lock = universe
        .solve_with(&manifest, Some(&pinned), SolveMode::Upgrade, &[])
        .await
        .unwrap();
    assert_pinned(&lock, "foo", "1.1.0");
}

#[tokio::test]
async fn test_unlock_set_scopes_an_upgrade() {
    let mut universe = Universe::new();
    universe
        .publish("a", "1.0.0", &[])
        .publish("a", "1.5.0", &[])
        .publish("b", "1.0.0", &[])
        .publish("b", "1.5.0", &[]);

    let manifest = root("app", &[("a", "^1.0.0"), ("b", "^1.0.0")]);
    let pinned = universe
        .solve(&root("app", &[("a", "1.0.0"), ("b", "1.0.0")]))
        .await
        .unwrap();

    let lock = universe
        .solve_with(&manifest, Some(&pinned), SolveMode::Upgrade, &["a"])
        .await
        .unwrap();
    assert_pinned(&lock, "a", "1.5.0");
    assert_pinned(&lock, "b", "1.0.0");
}

#[tokio::test]
async fn test_stale_pin_is_dropped_when_constraints_moved() {
    let mut universe = Universe::new();
    universe
        .publish("foo", "1.0.0", &[])
        .publish("foo", "1.1.0", &[]);

    let pinned = universe.solve(&root("app", &[("foo", "1.0.0")])).await.unwrap();

    // The manifest moved on; the pin no longer satisfies it.
    let lock = universe
        .solve_with(&root("app", &[("foo", "^1.1.0")]), Some(&pinned), SolveMode::Get, &[])
        .await
        .unwrap();
    assert_pinned(&lock, "foo", "1.1.0");
}

#[tokio::test]
async fn test_downgrade_prefers_oldest_allowed() {
    let mut universe = Universe::new();
    universe
        .publish("foo", "1.0.0", &[])
        .publish("foo", "1.1.0", &[])
        .publish("foo", "2.0.0", &[]);

    let lock = universe
        .solve_with(&root("app", &[("foo", "^1.0.0")]), None, SolveMode::Downgrade, &[])
        .await
        .unwrap();
    assert_pinned(&lock, "foo", "1.0.0");
}

#[tokio::test]
async fn test_dev_dependencies_of_non_root_are_invisible() {
    let mut universe = Universe::new();
    universe.publish_manifest(
        Manifest::new(PackageName::new("x"), v("1.0.0"))
            .with_dev_dependency(hosted_range("y", "^9.0.0")),
    );

    // y ^9.0.0 does not exist anywhere; resolution still succeeds.
    let lock = universe.solve(&root("app", &[("x", "^1.0.0")])).await.unwrap();
    assert_pinned(&lock, "x", "1.0.0");
    assert!(lock.id_for(&PackageName::new("y")).is_none());
}

#[tokio::test]
async fn test_root_dev_dependencies_are_resolved() {
    let mut universe = Universe::new();
    universe.publish("checker", "1.2.0", &[]);

    let manifest = Manifest::new(PackageName::new("app"), v("1.0.0"))
        .with_dev_dependency(hosted_range("checker", "^1.0.0"));
    let lock = universe.solve(&manifest).await.unwrap();
    assert_pinned(&lock, "checker", "1.2.0");
}

#[tokio::test]
async fn test_dependency_cycles_resolve() {
    let mut universe = Universe::new();
    universe
        .publish("a", "1.0.0", &[("b", "any")])
        .publish("b", "1.0.0", &[("a", "any")]);

    let lock = universe.solve(&root("app", &[("a", "any")])).await.unwrap();
    assert_pinned(&lock, "a", "1.0.0");
    assert_pinned(&lock, "b", "1.0.0");
}

#[tokio::test]
async fn test_missing_package_is_no_versions() {
    let universe = Universe::new();
    let err = universe
        .solve(&root("app", &[("ghost", "^1.0.0")]))
        .await
        .unwrap_err();
    assert!(matches!(err, SolveError::NoVersions { .. }), "got {err}");
    assert_eq!(err.exit_status(), ExitStatus::Data);
}

#[tokio::test]
async fn test_resolution_is_deterministic() {
    let mut universe = Universe::new();
    universe
        .publish("a", "1.0.0", &[("c", "^1.0.0")])
        .publish("a", "2.0.0", &[("c", "^2.0.0")])
        .publish("b", "1.0.0", &[("c", "^1.0.0")])
        .publish("c", "1.0.0", &[])
        .publish("c", "2.0.0", &[])
        .publish("d", "0.3.0", &[]);

    let manifest = root("app", &[("a", "any"), ("b", "any"), ("d", "any")]);
    let first = universe.solve(&manifest).await.unwrap();
    let second = universe.solve(&manifest).await.unwrap();
    assert_eq!(first.serialize(), second.serialize());
}

#[tokio::test]
async fn test_every_constraint_holds_in_the_solution() {
    let mut universe = Universe::new();
    universe
        .publish("a", "1.0.0", &[("c", "^1.0.0"), ("d", ">=0.2.0")])
        .publish("b", "1.0.0", &[("c", "<1.5.0")])
        .publish("c", "1.0.0", &[])
        .publish("c", "1.4.0", &[])
        .publish("c", "1.6.0", &[])
        .publish("d", "0.2.0", &[])
        .publish("d", "0.3.0", &[]);

    let declared = [
        ("a", "any"),
        ("b", "any"),
    ];
    let lock = universe.solve(&root("app", &declared)).await.unwrap();

    // Dependency constraints of every selected manifest hold for the
    // selected versions.
    for (pkg, deps) in [
        ("a", vec![("c", "^1.0.0"), ("d", ">=0.2.0")]),
        ("b", vec![("c", "<1.5.0")]),
    ] {
        assert!(lock.id_for(&PackageName::new(pkg)).is_some());
        for (dep, constraint) in deps {
            let id = lock.id_for(&PackageName::new(dep)).unwrap();
            assert!(
                c(constraint).allows(id.version()),
                "{pkg} requires {dep} {constraint}, got {}",
                id.version()
            );
        }
    }
    assert_pinned(&lock, "c", "1.4.0");
}

#[tokio::test]
async fn test_lockfile_roundtrips_through_text() {
    let mut universe = Universe::new();
    universe
        .publish("a", "1.0.0", &[("b", "any")])
        .publish("b", "2.0.0", &[]);

    let lock = universe.solve(&root("app", &[("a", "any")])).await.unwrap();
    let registry = universe.registry();
    let parsed = Lockfile::parse(&lock.serialize(), "keel.lock", &registry).unwrap();
    assert_eq!(parsed, lock);
}

#[tokio::test]
async fn test_feature_gated_dependencies_activate() {
    let mut universe = Universe::new();
    universe
        .publish_manifest(
            Manifest::new(PackageName::new("ui"), v("1.0.0"))
                .with_feature("themes", vec![hosted_range("palette", "^0.4.0")]),
        )
        .publish("palette", "0.4.2", &[]);

    // Without the feature the group stays dormant.
    let lock = universe.solve(&root("app", &[("ui", "any")])).await.unwrap();
    assert!(lock.id_for(&PackageName::new("palette")).is_none());

    // With it, the conditional group joins the graph.
    let manifest = Manifest::new(PackageName::new("app"), v("1.0.0")).with_dependency(
        hosted_range("ui", "any").with_features([FeatureName::new("themes")]),
    );
    let lock = universe.solve(&manifest).await.unwrap();
    assert_pinned(&lock, "ui", "1.0.0");
    assert_pinned(&lock, "palette", "0.4.2");
}

#[tokio::test]
async fn test_feature_enabled_after_decision_still_expands() {
    let mut universe = Universe::new();
    universe
        .publish_manifest(
            Manifest::new(PackageName::new("ui"), v("1.0.0"))
                .with_feature("themes", vec![hosted_range("palette", "^0.4.0")]),
        )
        .publish_manifest(
            Manifest::new(PackageName::new("enabler"), v("1.0.0")).with_dependency(
                hosted_range("ui", "any").with_features([FeatureName::new("themes")]),
            ),
        )
        .publish("palette", "0.4.2", &[]);

    // ui is decided before enabler's manifest requests the feature.
    let lock = universe
        .solve(&root("app", &[("ui", "any"), ("enabler", "any")]))
        .await
        .unwrap();
    assert_pinned(&lock, "palette", "0.4.2");
}

#[tokio::test]
async fn test_unknown_feature_is_rejected() {
    let mut universe = Universe::new();
    universe.publish("ui", "1.0.0", &[]);

    let manifest = Manifest::new(PackageName::new("app"), v("1.0.0")).with_dependency(
        hosted_range("ui", "any").with_features([FeatureName::new("nope")]),
    );
    let err = universe.solve(&manifest).await.unwrap_err();
    assert!(matches!(err, SolveError::UnknownFeature { .. }), "got {err}");
}

#[tokio::test]
async fn test_sdk_constraint_gates_candidates() {
    let mut universe = Universe::new();
    universe
        .with_magic("sdk", "3.1.0")
        .publish_manifest(
            Manifest::new(PackageName::new("foo"), v("2.0.0"))
                .with_environment("sdk", c("^9.0.0")),
        )
        .publish_manifest(
            Manifest::new(PackageName::new("foo"), v("1.0.0"))
                .with_environment("sdk", c("^3.0.0")),
        );

    // foo 2.0.0 wants a future SDK; the solver falls back to 1.0.0.
    let lock = universe.solve(&root("app", &[("foo", "any")])).await.unwrap();
    assert_pinned(&lock, "foo", "1.0.0");
}

#[tokio::test]
async fn test_root_sdk_mismatch_is_sdk_incompatible() {
    let mut universe = Universe::new();
    universe.with_magic("sdk", "3.1.0");

    let manifest =
        Manifest::new(PackageName::new("app"), v("1.0.0")).with_environment("sdk", c("^9.0.0"));
    let err = universe.solve(&manifest).await.unwrap_err();

    let SolveError::SdkIncompatible(report) = &err else {
        panic!("expected sdk incompatibility, got {err}");
    };
    assert_eq!(report.package(), &PackageName::new("sdk"));
    assert!(err.to_string().contains("3.1.0"), "got {err}");
}

#[tokio::test]
async fn test_unprovided_magic_package_is_sdk_incompatible() {
    let universe = Universe::new();
    let manifest =
        Manifest::new(PackageName::new("app"), v("1.0.0")).with_environment("gpu", c("any"));
    let err = universe.solve(&manifest).await.unwrap_err();
    assert!(matches!(err, SolveError::SdkIncompatible(_)), "got {err}");
    assert!(err.to_string().contains("does not provide gpu"), "got {err}");
}

#[tokio::test]
async fn test_description_mismatch_is_fatal() {
    let mut universe = Universe::new();
    universe.publish("foo", "1.0.0", &[]).publish_manifest(
        Manifest::new(PackageName::new("bar"), v("1.0.0")).with_dependency({
            let mirror = toml::Value::String("https://mirror.example".to_string());
            HostedSource::offline()
                .parse_ref(&PackageName::new("foo"), Some(&mirror))
                .unwrap()
                .with_constraint(c("any"))
        }),
    );

    let err = universe
        .solve(&root("app", &[("foo", "any"), ("bar", "any")]))
        .await
        .unwrap_err();
    assert!(matches!(err, SolveError::DescriptionMismatch { .. }), "got {err}");
}

#[tokio::test]
async fn test_path_dependency_resolves_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(MANIFEST_FILE),
        "[package]\nname = \"local\"\nversion = \"0.2.0\"\n",
    )
    .unwrap();

    let path_dep = {
        let raw = toml::Value::String(dir.path().display().to_string());
        PathSource::new()
            .parse_ref(&PackageName::new("local"), Some(&raw))
            .unwrap()
            .with_constraint(c("any"))
    };
    let manifest = Manifest::new(PackageName::new("app"), v("1.0.0")).with_dependency(path_dep);

    let universe = Universe::new();
    let lock = universe.solve(&manifest).await.unwrap();
    assert_pinned(&lock, "local", "0.2.0");
}

#[tokio::test]
async fn test_self_reference_validates_against_root_version() {
    let mut universe = Universe::new();
    universe.publish_manifest(
        Manifest::new(PackageName::new("helper"), v("1.0.0"))
            .with_dependency(hosted_range("app", "^1.0.0")),
    );

    let lock = universe.solve(&root("app", &[("helper", "any")])).await.unwrap();
    assert_pinned(&lock, "helper", "1.0.0");
    assert!(lock.id_for(&PackageName::new("app")).is_none());

    // And an impossible self-requirement fails.
    universe.publish_manifest(
        Manifest::new(PackageName::new("strict"), v("1.0.0"))
            .with_dependency(hosted_range("app", "^7.0.0")),
    );
    let err = universe
        .solve(&root("app", &[("strict", "any")]))
        .await
        .unwrap_err();
    assert!(matches!(err, SolveError::Unsatisfiable(_)), "got {err}");
}
