#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::db::Database;
    use crate::status::{compute_status, SystemStatus, SystemStatusEnum};
    use tempfile::TempDir;

    #[test]
    fn test_new_system_is_setup_regardless_of_schema() {
        assert_eq!(compute_status(true, Some(1), 3), SystemStatusEnum::Setup);
        assert_eq!(compute_status(true, Some(3), 3), SystemStatusEnum::Setup);
        assert_eq!(compute_status(true, None, 3), SystemStatusEnum::Setup);
    }

    #[test]
    fn test_older_schema_needs_migration() {
        assert_eq!(compute_status(false, Some(1), 3), SystemStatusEnum::NeedsMigration);
        assert_eq!(compute_status(false, None, 3), SystemStatusEnum::NeedsMigration);
    }

    #[test]
    fn test_current_or_newer_schema_is_ok() {
        assert_eq!(compute_status(false, Some(3), 3), SystemStatusEnum::Ok);
        assert_eq!(compute_status(false, Some(4), 3), SystemStatusEnum::Ok);
    }

    #[test]
    fn test_status_serializes_screaming_snake_case() {
        let v = serde_json::to_value(SystemStatusEnum::NeedsMigration).unwrap();
        assert_eq!(v, serde_json::json!("NEEDS_MIGRATION"));
    }

    #[tokio::test]
    async fn test_collect_reads_live_values() {
        let dir = TempDir::new().unwrap();
        let config = Config::in_memory();
        let db = Database::new();

        let before = SystemStatus::collect(&config, &db).await;
        assert_eq!(before.status, SystemStatusEnum::Setup);
        assert_eq!(before.database_schema, None);
        assert_eq!(before.app_schema, 3);

        let path = dir.path().join("lib.sqlite");
        db.initialize(&path).await.unwrap();
        config.finalize_setup();

        let after = SystemStatus::collect(&config, &db).await;
        assert_eq!(after.status, SystemStatusEnum::Ok);
        assert_eq!(after.database_schema, Some(3));
        assert_eq!(after.database_path, Some(path));
        db.close().await.unwrap();
    }
}
