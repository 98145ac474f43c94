mod common;

use anyhow::Result;
use bursa::application::WalletError;
use common::{funded_user, test_service};
use uuid::Uuid;

#[tokio::test]
async fn test_register_creates_empty_wallet() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = Uuid::new_v4();

    let wallet = service.register_user(user).await?;
    assert_eq!(wallet.balance, 0);
    assert_eq!(wallet.version, 0);

    assert_eq!(service.get_balance(user).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_register_twice_fails() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = Uuid::new_v4();

    service.register_user(user).await?;
    let err = service.register_user(user).await.unwrap_err();
    assert!(matches!(err, WalletError::WalletAlreadyExists(id) if id == user));
    Ok(())
}

#[tokio::test]
async fn test_get_balance_unknown_user() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = Uuid::new_v4();

    let err = service.get_balance(user).await.unwrap_err();
    assert!(matches!(err, WalletError::UserNotFound(id) if id == user));
    Ok(())
}

#[tokio::test]
async fn test_update_unknown_user() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let err = service
        .update_balance(Uuid::new_v4(), 100, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::UserNotFound(_)));
    Ok(())
}

#[tokio::test]
async fn test_credits_and_debits_accumulate() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = funded_user(&service, 10000).await?;

    service.update_balance(user, 2500, None).await?;
    service.update_balance(user, -500, None).await?;
    service.update_balance(user, -2000, None).await?;

    assert_eq!(service.get_balance(user).await?, 10000 + 2500 - 500 - 2000);
    Ok(())
}

#[tokio::test]
async fn test_overdraw_fails_and_leaves_balance_unchanged() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = funded_user(&service, 5000).await?;

    let err = service.update_balance(user, -5001, None).await.unwrap_err();
    match err {
        WalletError::InsufficientFunds { balance, requested } => {
            assert_eq!(balance, 5000);
            assert_eq!(requested, -5001);
        }
        other => panic!("expected insufficient funds, got {other}"),
    }

    assert_eq!(service.get_balance(user).await?, 5000);
    Ok(())
}

#[tokio::test]
async fn test_debit_to_exactly_zero_is_allowed() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = funded_user(&service, 5000).await?;

    let outcome = service.update_balance(user, -5000, None).await?;
    assert_eq!(outcome.balance, 0);
    Ok(())
}

// Typical purchase flow: balance 100, a 30 debit succeeds, a following
// 80 debit must fail without touching the balance.
#[tokio::test]
async fn test_purchase_flow_example() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = funded_user(&service, 100).await?;

    let first = service.update_balance(user, -30, Some("order-1")).await?;
    assert_eq!(first.balance, 70);

    let err = service
        .update_balance(user, -80, Some("order-2"))
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InsufficientFunds { .. }));

    assert_eq!(service.get_balance(user).await?, 70);
    Ok(())
}

#[tokio::test]
async fn test_zero_delta_is_invalid() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = funded_user(&service, 100).await?;

    let err = service.update_balance(user, 0, None).await.unwrap_err();
    assert!(matches!(err, WalletError::InvalidAmount(_)));
    assert_eq!(service.get_balance(user).await?, 100);
    Ok(())
}

#[tokio::test]
async fn test_archived_wallet_rejects_updates_but_stays_readable() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = funded_user(&service, 1000).await?;

    service.archive_user(user).await?;

    let err = service.update_balance(user, 100, None).await.unwrap_err();
    assert!(matches!(err, WalletError::WalletArchived(id) if id == user));

    // Balance and history remain readable for audit
    assert_eq!(service.get_balance(user).await?, 1000);
    let page = service.history().list_history(user, None, None).await?;
    assert_eq!(page.entries.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_archive_unknown_user() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let err = service.archive_user(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, WalletError::UserNotFound(_)));
    Ok(())
}

#[tokio::test]
async fn test_version_increments_per_committed_update() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = funded_user(&service, 0).await?;

    service.update_balance(user, 100, None).await?;
    service.update_balance(user, 100, None).await?;
    // Failed updates must not bump the version
    let _ = service.update_balance(user, -1000, None).await.unwrap_err();
    service.update_balance(user, 100, None).await?;

    let report = service.verify_integrity(user).await?;
    assert_eq!(report.entry_count, 3);
    assert!(report.is_consistent());
    Ok(())
}

#[tokio::test]
async fn test_integrity_report_matches_history() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let user = funded_user(&service, 10000).await?;

    service.update_balance(user, -2500, Some("order-1")).await?;
    service.update_balance(user, 300, None).await?;
    service.update_balance(user, -800, Some("order-2")).await?;

    let report = service.verify_integrity(user).await?;
    assert_eq!(report.entry_count, 4);
    assert_eq!(report.stored_balance, 10000 - 2500 + 300 - 800);
    assert_eq!(report.replayed_balance, report.stored_balance);
    assert!(!report.went_negative);
    assert!(report.is_consistent());
    Ok(())
}
