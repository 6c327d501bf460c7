//! Planning tests: expansion plus resolution of a realistic workflow.
//!
//! Run with: `cargo test -p trellis-tests --test matrix_tests`

use pretty_assertions::assert_eq;
use serde_json::json;
use trellis_core::Error;
use trellis_runner::plan;
use trellis_tests::{ContextFixture, WorkflowFixture, entry};

#[test]
fn test_fury_plan_merges_one_include_and_appends_the_other() {
    let jobs = plan(&WorkflowFixture::fury(), &ContextFixture::push_master("ubuntu-latest")).unwrap();

    let names: Vec<&str> = jobs.iter().map(|j| j.display_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "fury (python-version=3.10, os=ubuntu-latest)",
            "fury (python-version=3.10, os=macos-latest)",
            "fury (python-version=3.11, os=ubuntu-latest, depends=OPTIONAL_DEPS, options=COVERAGE DEPLOY_DOCS)",
            "fury (python-version=3.11, os=macos-latest)",
            "fury (python-version=3.12, os=ubuntu-latest, options=USE_PRE, experimental=true)",
        ]
    );
    assert_eq!(jobs.iter().map(|j| j.index).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);

    let coverage = &jobs[2];
    assert!(coverage.flag("COVERAGE"));
    assert!(coverage.flag("DEPLOY_DOCS"));
    assert!(!coverage.flag("USE_PRE"));
    assert_eq!(coverage.env["EXTENDED_DEPS"], "true");
    assert_eq!(coverage.env["INSTALL_OPTIONAL_DEPS"], "true");
    assert_eq!(coverage.env["OPTIONS"], "COVERAGE DEPLOY_DOCS");

    let pre = &jobs[4];
    assert!(pre.continue_on_error);
    assert!(pre.flag("USE_PRE"));
    assert_eq!(pre.value("experimental"), Some(&json!(true)));
    assert_eq!(pre.env["EXTENDED_DEPS"], "false");

    assert!(jobs[..4].iter().all(|j| !j.continue_on_error));
}

#[test]
fn test_plan_is_order_stable() {
    let definition = WorkflowFixture::fury();
    let ctx = ContextFixture::pull_request("ubuntu-latest");

    let first = plan(&definition, &ctx).unwrap();
    let second = plan(&definition, &ctx).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_os_and_event_aliases_agree() {
    let jobs = plan(&WorkflowFixture::fury(), &ContextFixture::scheduled("ubuntu-latest")).unwrap();

    for job in &jobs {
        assert_eq!(job.env["CI_OS_NAME"], job.env["TRAVIS_OS_NAME"]);
        assert_eq!(job.env["CI_EVENT_TYPE"], "cron");
        assert_eq!(job.env["TRAVIS_EVENT_TYPE"], "cron");
        assert_eq!(job.env["CI_BRANCH"], job.env["TRAVIS_BRANCH"]);
        assert_eq!(job.env["CI_REPOSITORY"], "fury-gl/fury");
        assert_eq!(job.env["TRAVIS_REPO_SLUG"], "fury-gl/fury");
    }
    assert_eq!(jobs[0].env["CI_OS_NAME"], "ubuntu-latest");
    assert_eq!(jobs[1].env["CI_OS_NAME"], "osx");
    assert_eq!(jobs[1].env["TRAVIS_OS_NAME"], "osx");
}

#[test]
fn test_job_without_os_uses_runner_os() {
    let definition = WorkflowFixture::parse(
        r#"
name: lint
matrix:
  axes:
    python-version: ["3.11"]
"#,
    );

    let jobs = plan(&definition, &ContextFixture::pull_request("macos-14")).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].env["CI_OS_NAME"], "osx");
    assert_eq!(jobs[0].env["CI_EVENT_TYPE"], "pull_request");
}

#[test]
fn test_unknown_include_value_is_rejected_before_resolution() {
    let definition = WorkflowFixture::parse(
        r#"
name: strict
matrix:
  axes:
    os: [ubuntu-latest, macos-latest]
  include:
    - { os: windows-latest, options: COVERAGE }
"#,
    );

    let err = plan(&definition, &ContextFixture::push_master("ubuntu-latest")).unwrap_err();
    assert!(matches!(err, Error::UnknownAxisValue { ref value, .. } if value == "windows-latest"));
}

#[test]
fn test_include_on_product_job_merges_without_new_job() {
    let definition = WorkflowFixture::parse(
        r#"
name: deps
matrix:
  axes:
    os: [ubuntu, macos]
    deps: [DEFAULT, OPTIONAL]
  include:
    - { os: ubuntu, deps: OPTIONAL, options: COVERAGE }
"#,
    );

    let jobs = plan(&definition, &ContextFixture::push_master("ubuntu-latest")).unwrap();
    assert_eq!(jobs.len(), 4);
    assert_eq!(
        jobs[1].values,
        entry(&[("os", "ubuntu"), ("deps", "OPTIONAL"), ("options", "COVERAGE")])
    );
    assert!(jobs[1].flag("COVERAGE"));
    assert_eq!(jobs.iter().filter(|j| j.flag("COVERAGE")).count(), 1);
}
