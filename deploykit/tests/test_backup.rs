//! Backup retention and restore integrity tests

mod common;

use common::Harness;
use deploykit::errors::DeployError;
use deploykit::models::deployment::Outcome;

#[tokio::test]
async fn test_six_deploys_keep_last_five_backups() {
    let h = Harness::new().await;

    for n in 1..=6 {
        let attempt = h
            .orchestrator
            .deploy(h.artifact(&format!("v{}", n)).await)
            .await
            .unwrap();
        assert_eq!(attempt.final_outcome(), Outcome::Committed);
        assert_eq!(attempt.backup_seq, Some(n));
    }

    let seqs: Vec<u64> = h.backups.list().await.unwrap().iter().map(|b| b.seq).collect();
    assert_eq!(seqs, vec![2, 3, 4, 5, 6]);

    // backup 6 holds v5, the release live before v6
    let newest = h.backups.list().await.unwrap().pop().unwrap();
    assert_eq!(newest.release.unwrap().version, "v5");
}

#[tokio::test]
async fn test_sequence_survives_pruning_of_everything_older() {
    let h = Harness::new().await;
    for n in 1..=7 {
        h.orchestrator
            .deploy(h.artifact(&format!("v{}", n)).await)
            .await
            .unwrap();
    }

    let backup = h.backups.create().await.unwrap();
    assert_eq!(backup.seq, 8);
    assert_eq!(h.backups.list().await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_corrupt_backup_is_not_restored() {
    let h = Harness::new().await;
    let v1 = h.artifact("v1").await;
    h.orchestrator.deploy(v1.clone()).await.unwrap();
    h.orchestrator.deploy(h.artifact("v2").await).await.unwrap();
    let live_before = h.tree.live_digest().await.unwrap();

    // tamper with backup 2 (which holds v1)
    let backup = h
        .backups
        .list()
        .await
        .unwrap()
        .into_iter()
        .find(|b| b.seq == 2)
        .unwrap();
    let content = h
        .tree
        .layout()
        .backups_dir()
        .path()
        .join(backup.dir_name())
        .join("content");
    std::fs::write(content.join("VERSION"), "tampered").unwrap();

    let result = h.backups.restore(2).await;
    assert!(matches!(result, Err(DeployError::Restore(_))));
    assert_eq!(h.tree.live_digest().await.unwrap(), live_before);
}

#[tokio::test]
async fn test_restore_with_no_backups_fails() {
    let h = Harness::new().await;
    assert!(h.backups.latest_seq().await.unwrap().is_none());
    assert!(matches!(
        h.backups.restore(1).await,
        Err(DeployError::Restore(_))
    ));
}
