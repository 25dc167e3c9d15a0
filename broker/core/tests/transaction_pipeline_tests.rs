// Copyright (c) 2026 pkgbroker contributors
// SPDX-License-Identifier: AGPL-3.0

//! Stage, build and run through `PackageService`, including signing-key
//! confirmation and the id codec as seen by clients.

mod common;

use serde_json::json;

use common::*;
use pkgbroker_core::application::catalog::{ATTRIBUTE_NONE, PACKAGE_NOT_FOUND};
use pkgbroker_core::application::error::ServiceError;
use pkgbroker_core::application::transaction::{resolution_value, RunOutcome};
use pkgbroker_core::domain::events::TransactionPhase;
use pkgbroker_core::domain::package::{PackageId, Verb};

#[tokio::test]
async fn test_install_from_repository_end_to_end() {
    let h = harness();
    let a = root(":1.1");

    assert!(h.service.lock(&a).await.unwrap());
    let staged = h.service.add_transaction(&a, FOO_ID, "install").await.unwrap();
    assert_eq!(staged.len(), 1);

    let built = h.service.build_transaction(&a).await.unwrap();
    assert_eq!(
        resolution_value(&built),
        json!([2, [["install", [[FOO_ID, 1024, []]]]]])
    );

    let outcome = h.service.run_transaction(&a).await.unwrap();
    assert_eq!(outcome, RunOutcome::Success);
    assert_eq!(outcome.code(), 0);

    let installed: Vec<String> = h
        .service
        .get_packages(&a, "installed")
        .await
        .unwrap()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert!(installed.contains(&FOO_INSTALLED_ID.to_string()));
    assert!(h.service.get_transaction(&a).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_build_is_repeatable() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();
    h.service.add_transaction(&a, FOO_ID, "install").await.unwrap();

    let first = h.service.build_transaction(&a).await.unwrap();
    let second = h.service.build_transaction(&a).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.service.get_transaction(&a).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_build_reports_nothing_to_do() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();

    let built = h.service.build_transaction(&a).await.unwrap();
    assert_eq!(built.code(), 0);
}

#[tokio::test]
async fn test_clear_transaction_empties_staged_set() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();
    h.service.add_transaction(&a, FOO_ID, "install").await.unwrap();

    h.service.clear_transaction(&a).await.unwrap();
    assert!(h.service.get_transaction(&a).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_run_emits_phases_in_order() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();
    h.service.add_transaction(&a, FOO_ID, "install").await.unwrap();
    h.service.build_transaction(&a).await.unwrap();
    h.sink.clear();

    h.service.run_transaction(&a).await.unwrap();

    let phases = h.sink.phases();
    assert_eq!(phases.first(), Some(&TransactionPhase::StartRun));
    assert_eq!(phases.last(), Some(&TransactionPhase::EndRun));
    let position = |p: TransactionPhase| phases.iter().position(|x| *x == p);
    assert!(position(TransactionPhase::Download) < position(TransactionPhase::SignatureCheck));
    assert!(position(TransactionPhase::SignatureCheck) < position(TransactionPhase::RunTransaction));
    assert!(!phases.contains(&TransactionPhase::Fail));
}

#[tokio::test]
async fn test_untrusted_key_is_prompted_exactly_once() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();
    h.service.add_transaction(&a, SIGNED_ID, "install").await.unwrap();

    let first = h.service.run_transaction(&a).await.unwrap();
    assert_eq!(first.code(), 1);
    assert_eq!(h.sink.key_prompts(), vec![SIGNING_KEY.to_string()]);

    // Still pending: refused without a second prompt. The failed run
    // consumes the staged set, so the package is staged again below.
    let second = h.service.run_transaction(&a).await.unwrap();
    assert_eq!(second.code(), 2);
    assert_eq!(h.sink.key_prompts().len(), 1);
    assert!(!h.factory.is_key_trusted(SIGNING_KEY));
    assert!(h.service.get_transaction(&a).await.unwrap().is_empty());

    h.service.add_transaction(&a, SIGNED_ID, "install").await.unwrap();
    h.service.confirm_gpg_import(&a, SIGNING_KEY, true).await.unwrap();
    let third = h.service.run_transaction(&a).await.unwrap();
    assert_eq!(third, RunOutcome::Success);
    assert_eq!(h.sink.key_prompts().len(), 1);
    assert!(h.factory.is_key_trusted(SIGNING_KEY));
}

#[tokio::test]
async fn test_confirmed_key_retry_reuses_staged_set() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();
    h.service.add_transaction(&a, SIGNED_ID, "install").await.unwrap();

    assert_eq!(h.service.run_transaction(&a).await.unwrap().code(), 1);
    assert_eq!(h.service.get_transaction(&a).await.unwrap().len(), 1);

    h.service.confirm_gpg_import(&a, SIGNING_KEY, true).await.unwrap();
    assert_eq!(h.service.run_transaction(&a).await.unwrap(), RunOutcome::Success);
    assert_eq!(h.sink.key_prompts(), vec![SIGNING_KEY.to_string()]);
    assert!(h
        .factory
        .installed_ids()
        .iter()
        .any(|id| id.to_string() == "signed,0,2.0,1,noarch,@installed"));
}

#[tokio::test]
async fn test_each_key_is_prompted_in_turn() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();
    h.service.add_transaction(&a, SIGNED_ID, "install").await.unwrap();
    h.service.add_transaction(&a, OTHER_SIGNED_ID, "install").await.unwrap();

    assert_eq!(h.service.run_transaction(&a).await.unwrap().code(), 1);
    assert_eq!(h.sink.key_prompts(), vec![SIGNING_KEY.to_string()]);

    h.service.confirm_gpg_import(&a, SIGNING_KEY, true).await.unwrap();
    assert_eq!(h.service.run_transaction(&a).await.unwrap().code(), 1);
    assert_eq!(
        h.sink.key_prompts(),
        vec![SIGNING_KEY.to_string(), OTHER_SIGNING_KEY.to_string()]
    );

    h.service.confirm_gpg_import(&a, OTHER_SIGNING_KEY, true).await.unwrap();
    assert_eq!(h.service.run_transaction(&a).await.unwrap().code(), 0);
    assert_eq!(h.sink.key_prompts().len(), 2);
}

#[tokio::test]
async fn test_refused_key_fails_the_run() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();
    h.service.add_transaction(&a, SIGNED_ID, "install").await.unwrap();
    assert_eq!(h.service.run_transaction(&a).await.unwrap().code(), 1);

    h.service.confirm_gpg_import(&a, SIGNING_KEY, false).await.unwrap();
    let outcome = h.service.run_transaction(&a).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Failed(_)));
    assert!(h.sink.phases().contains(&TransactionPhase::Fail));
    assert!(!h.factory.installed_ids().iter().any(|id| id.nevra.name == "signed"));
}

#[tokio::test]
async fn test_installed_package_is_reported_as_installed() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();
    h.service.add_transaction(&a, FOO_ID, "install").await.unwrap();
    h.service.run_transaction(&a).await.unwrap();

    let by_name: Vec<String> = h
        .service
        .get_packages_by_name(&a, "foo", false)
        .await
        .unwrap()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(by_name, vec![FOO_INSTALLED_ID.to_string()]);

    // Both spellings decode to the same package.
    assert_eq!(h.service.get_attribute(&a, FOO_INSTALLED_ID, "name").await.unwrap(), json!("foo"));
    assert_eq!(h.service.get_attribute(&a, FOO_ID, "name").await.unwrap(), json!("foo"));
    assert_eq!(h.service.get_attribute(&a, FOO_INSTALLED_ID, "action").await.unwrap(), json!("remove"));
}

#[tokio::test]
async fn test_name_patterns_accept_character_classes() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();

    let found: Vec<String> = h
        .service
        .get_packages_by_name(&a, "[fb]oo", false)
        .await
        .unwrap()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(found, vec![FOO_ID.to_string()]);
    assert!(h.service.get_packages_by_name(&a, "foo[", false).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_attribute_sentinels() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();

    assert_eq!(
        h.service.get_attribute(&a, FOO_ID, "no-such-attribute").await.unwrap(),
        json!(ATTRIBUTE_NONE)
    );
    assert_eq!(
        h.service.get_attribute(&a, "ghost,0,9,9,x86_64,repoA", "name").await.unwrap(),
        json!(PACKAGE_NOT_FOUND)
    );
    assert_eq!(
        h.service.get_attribute(&a, "not-an-id", "name").await.unwrap(),
        json!(PACKAGE_NOT_FOUND)
    );
}

#[tokio::test]
async fn test_add_transaction_edge_cases() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();

    assert!(matches!(
        h.service.add_transaction(&a, FOO_ID, "frobnicate").await,
        Err(ServiceError::InvalidArgument(_))
    ));
    assert!(matches!(
        h.service.add_transaction(&a, "foo,0,1.0", "install").await,
        Err(ServiceError::InvalidArgument(_))
    ));
    assert!(h
        .service
        .add_transaction(&a, "ghost,0,9,9,x86_64,repoA", "install")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_update_with_no_patterns_updates_everything() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();

    let built = h.service.stage_commands(&a, Verb::Update, "").await.unwrap();
    assert_eq!(
        resolution_value(&built),
        json!([2, [["update", [["bar,0,3.2,1,x86_64,repoA", 1024, []]]]]])
    );
}

#[tokio::test]
async fn test_stage_commands_skips_unknown_names() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();

    let built = h.service.stage_commands(&a, Verb::Install, "ghost foo").await.unwrap();
    assert_eq!(built.code(), 2);
    assert_eq!(h.service.get_transaction(&a).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_repository_queries() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();

    let enabled = h.service.get_repositories(&a, "enabled").await.unwrap();
    assert!(enabled.contains(&"repoA".to_string()));
    assert!(h.service.get_repo(&a, "missing").await.unwrap().is_null());

    h.service.set_enabled_repos(&a, vec!["repoA".to_string()]).await.unwrap();
    assert_eq!(h.service.get_repositories(&a, "enabled").await.unwrap(), vec!["repoA".to_string()]);
}

#[tokio::test]
async fn test_config_is_session_local() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();

    assert_eq!(h.service.get_config(&a, "recent").await.unwrap(), json!(7));
    assert!(h.service.get_config(&a, "no_such_setting").await.unwrap().is_null());
    assert!(h.service.set_config(&a, "recent", json!(30)).await.unwrap());
    assert_eq!(h.service.get_config(&a, "recent").await.unwrap(), json!(30));

    h.service.unlock(&a).await.unwrap();
    h.service.lock(&a).await.unwrap();
    assert_eq!(h.service.get_config(&a, "recent").await.unwrap(), json!(7));
}

#[tokio::test]
async fn test_groups_and_update_info() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();

    let tree = json!(h.service.get_groups(&a).await.unwrap());
    assert_eq!(tree, json!([[["system", "System", ""], [["core-tools", "Core tools", "", true]]]]));

    let ids = |found: Vec<PackageId>| -> Vec<String> { found.iter().map(ToString::to_string).collect() };
    let default = h.service.get_group_packages(&a, "core-tools", "default").await.unwrap();
    assert_eq!(ids(default), vec!["bar,0,3.1,2,x86_64,@installed", FOO_ID]);
    let all = h.service.get_group_packages(&a, "core-tools", "all").await.unwrap();
    assert_eq!(ids(all), vec!["bar,0,3.1,2,x86_64,@installed", FOO_ID, OTHER_SIGNED_ID]);
    assert!(matches!(
        h.service.get_group_packages(&a, "core-tools", "optional").await,
        Err(ServiceError::InvalidArgument(_))
    ));

    let info = h.service.get_update_info(&a, BAR_UPDATE_ID).await.unwrap();
    assert_eq!(info["id"], json!(BAR_ADVISORY));
    assert_eq!(info["type"], json!("security"));
    assert!(h.service.get_update_info(&a, FOO_ID).await.unwrap().is_null());

    let b = root(":1.2");
    assert!(matches!(h.service.get_groups(&b).await, Err(ServiceError::LockedByOther)));
}

#[tokio::test]
async fn test_oversized_recent_window_is_refused() {
    let h = harness();
    let a = root(":1.1");
    h.service.lock(&a).await.unwrap();

    assert!(!h.service.set_config(&a, "recent", json!(1u64 << 62)).await.unwrap());
    assert!(!h.service.set_config(&a, "recent", json!("forever")).await.unwrap());
    assert_eq!(h.service.get_config(&a, "recent").await.unwrap(), json!(7));
    assert!(h.service.get_packages(&a, "recent").await.is_ok());
    assert!(h.service.get_packages(&a, "installed").await.is_ok());
}
