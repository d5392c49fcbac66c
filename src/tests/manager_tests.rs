#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::manager::{
        apply_setup_defaults, exit_code_after_close, FatalStartupError, InitCell, Manager, SetupError, SetupInput,
    };
    use crate::migration::MigrateInput;
    use crate::status::SystemStatusEnum;
    use crate::tests::fixtures::{
        configured_manager, create_db_at_version, new_system_manager, test_options, write_config, BrokenAcquirer,
    };
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_init_cell_runs_once_for_concurrent_callers() {
        let cell: Arc<InitCell<String, String>> = Arc::new(InitCell::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cell = cell.clone();
            let runs = runs.clone();
            tasks.push(tokio::spawn(async move {
                cell.get_or_init(|| async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Arc::new("ready".to_string()))
                })
                .await
            }));
        }

        let mut values = Vec::new();
        for t in tasks {
            values.push(t.await.unwrap().unwrap());
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
        assert_eq!(cell.get().as_deref().map(String::as_str), Some("ready"));
    }

    #[tokio::test]
    async fn test_init_cell_remembers_failure() {
        let cell: InitCell<u32, String> = InitCell::new();
        let first = cell.get_or_init(|| async { Err("boom".to_string()) }).await;
        assert_eq!(first.unwrap_err().as_str(), "boom");

        let second = cell.get_or_init(|| async { Ok(Arc::new(7)) }).await;
        assert_eq!(second.unwrap_err().as_str(), "boom");
        assert!(cell.get().is_none());
    }

    #[test]
    fn test_exit_code_escalation() {
        assert_eq!(exit_code_after_close(0, true), 0);
        assert_eq!(exit_code_after_close(0, false), 1);
        assert_eq!(exit_code_after_close(2, false), 2);
        assert_eq!(exit_code_after_close(3, true), 3);
    }

    #[test]
    fn test_setup_defaults() {
        let home = Path::new("/home/u/.mediathek");
        let resolved = apply_setup_defaults(&SetupInput::default(), Some(&home.join("config.toml"))).unwrap();
        assert_eq!(resolved.config_location, home.join("config.toml"));
        assert_eq!(resolved.generated_location, home.join("generated"));
        assert_eq!(resolved.database_file, home.join("mediathek.sqlite"));

        let input = SetupInput {
            config_location: Some(PathBuf::from("/srv/m/config.toml")),
            database_file: Some(PathBuf::from("/db/m.sqlite")),
            ..Default::default()
        };
        let resolved = apply_setup_defaults(&input, Some(&home.join("config.toml"))).unwrap();
        assert_eq!(resolved.generated_location, PathBuf::from("/srv/m/generated"));
        assert_eq!(resolved.database_file, PathBuf::from("/db/m.sqlite"));

        assert!(matches!(apply_setup_defaults(&SetupInput::default(), None), Err(SetupError::NoHomeDirectory)));
    }

    #[tokio::test]
    async fn test_new_system_starts_in_setup_mode() {
        let dir = TempDir::new().unwrap();
        let manager = new_system_manager(dir.path()).await;

        let status = manager.system_status().await;
        assert_eq!(status.status, SystemStatusEnum::Setup);
        assert_eq!(status.database_schema, None);
        assert!(!manager.database.is_open().await);
        assert!(manager.paths().is_none());
    }

    #[tokio::test]
    async fn test_setup_configures_new_system() {
        let dir = TempDir::new().unwrap();
        let manager = new_system_manager(dir.path()).await;
        let cfg_dir = dir.path().join("cfg");

        let input = SetupInput {
            config_location: Some(cfg_dir.join("config.toml")),
            libraries: vec![dir.path().join("media")],
            ..Default::default()
        };
        manager.setup(input).await.unwrap();

        assert!(!manager.config.is_new_system());
        assert!(cfg_dir.join("generated").join("screenshots").is_dir());
        assert!(cfg_dir.join("mediathek.sqlite").is_file());
        assert!(manager.transcoder().is_complete());
        assert_eq!(manager.metrics.get_snapshot().setups_completed, 1);

        let status = manager.system_status().await;
        assert_eq!(status.status, SystemStatusEnum::Ok);
        assert_eq!(status.database_schema, Some(status.app_schema));
        assert_eq!(status.config_path, Some(cfg_dir.join("config.toml")));

        let written = Config::from_file(cfg_dir.join("config.toml")).unwrap();
        assert!(!written.is_new_system());
        assert_eq!(written.database_path(), Some(cfg_dir.join("mediathek.sqlite")));
        assert_eq!(written.settings().libraries, vec![dir.path().join("media")]);

        let again = manager.setup(SetupInput::default()).await;
        assert!(matches!(again, Err(SetupError::AlreadyConfigured)));
        manager.close_for_exit(0).await;
    }

    #[tokio::test]
    async fn test_setup_defaults_to_home_directory() {
        let dir = TempDir::new().unwrap();
        let config = Config::in_memory();
        let manager = Manager::initialize(config, test_options(dir.path())).await.ok().unwrap();

        manager.setup(SetupInput::default()).await.unwrap();

        let home = dir.path().join("home");
        assert!(home.join("config.toml").is_file());
        assert!(home.join("mediathek.sqlite").is_file());
        assert_eq!(manager.config.config_file(), Some(home.join("config.toml")));
        manager.close_for_exit(0).await;
    }

    #[tokio::test]
    async fn test_failed_setup_can_be_retried() {
        let dir = TempDir::new().unwrap();
        let mut options = test_options(dir.path());
        options.acquirer = Some(Arc::new(BrokenAcquirer));
        let config = Config::from_file(dir.path().join("cfg").join("config.toml")).unwrap();
        let manager = Manager::initialize(config, options).await.ok().unwrap();

        // a file where the generated directory should go
        std::fs::write(dir.path().join("blocked"), b"").unwrap();
        let input = SetupInput {
            config_location: Some(dir.path().join("cfg").join("config.toml")),
            generated_location: Some(dir.path().join("blocked").join("generated")),
            ..Default::default()
        };
        let err = manager.setup(input.clone()).await.unwrap_err();
        assert!(matches!(err, SetupError::CreateGeneratedDir { .. }));
        assert!(manager.config.is_new_system());

        let input = SetupInput { generated_location: Some(dir.path().join("generated")), ..input };
        // transcoder discovery fails last; the system is configured nevertheless
        let err = manager.setup(input).await.unwrap_err();
        assert!(matches!(err, SetupError::Transcoder(_)));
        assert!(!manager.config.is_new_system());
        assert_eq!(manager.system_status().await.status, SystemStatusEnum::Ok);
        manager.close_for_exit(0).await;
    }

    #[tokio::test]
    async fn test_configured_system_needs_migration_then_ok() {
        let dir = TempDir::new().unwrap();
        create_db_at_version(&dir.path().join("cfg").join("mediathek.sqlite"), 1).await;
        let manager = configured_manager(dir.path(), "").await;

        let status = manager.system_status().await;
        assert_eq!(status.status, SystemStatusEnum::NeedsMigration);
        assert_eq!(status.database_schema, Some(1));
        assert_eq!(manager.metrics.get_snapshot().post_migrate_runs, 0);

        let record = manager.migrate(MigrateInput::default()).await.unwrap();
        assert_eq!((record.from_version, record.to_version), (1, 3));
        assert_eq!(manager.system_status().await.status, SystemStatusEnum::Ok);

        let m = manager.metrics.get_snapshot();
        assert_eq!(m.migrations_run, 1);
        assert_eq!(m.migrations_failed, 0);
        assert_eq!(manager.close_for_exit(0).await, 0);
    }

    #[tokio::test]
    async fn test_startup_runs_post_migrate_when_ready() {
        let dir = TempDir::new().unwrap();
        let manager = configured_manager(dir.path(), "").await;
        assert_eq!(manager.system_status().await.status, SystemStatusEnum::Ok);
        assert_eq!(manager.metrics.get_snapshot().post_migrate_runs, 1);
        manager.close_for_exit(0).await;
    }

    #[tokio::test]
    async fn test_invalid_config_is_fatal() {
        let dir = TempDir::new().unwrap();
        let file = write_config(dir.path(), "port = 0");
        let config = Config::from_file(&file).unwrap();
        let result = Manager::initialize(config, test_options(dir.path())).await;
        assert!(matches!(result, Err(FatalStartupError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_unopenable_database_is_fatal() {
        let dir = TempDir::new().unwrap();
        let cfg_dir = dir.path().join("cfg");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        // a directory where the database file should be
        std::fs::create_dir_all(cfg_dir.join("mediathek.sqlite")).unwrap();
        let file = write_config(dir.path(), "");
        let config = Config::from_file(&file).unwrap();
        let result = Manager::initialize(config, test_options(dir.path())).await;
        assert!(matches!(result, Err(FatalStartupError::Database(_))));
    }

    #[tokio::test]
    async fn test_startup_clears_stale_temp_files() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("cfg").join("generated").join("tmp");
        std::fs::create_dir_all(&tmp).unwrap();
        std::fs::write(tmp.join("stale.part"), b"x").unwrap();
        std::fs::create_dir_all(tmp.join("nested")).unwrap();

        let manager = configured_manager(dir.path(), "").await;
        // cleanup either finished within the timeout or continues as a job
        for _ in 0..50 {
            if manager.jobs.len().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(tmp.is_dir());
        assert!(!tmp.join("stale.part").exists());
        assert!(!tmp.join("nested").exists());
        manager.close_for_exit(0).await;
    }

    #[tokio::test]
    async fn test_slow_temp_cleanup_continues_in_background() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("cfg").join("generated").join("tmp");
        for d in 0..20 {
            let sub = tmp.join(format!("d{}", d));
            std::fs::create_dir_all(&sub).unwrap();
            for f in 0..100 {
                std::fs::write(sub.join(format!("f{}.part", f)), b"x").unwrap();
            }
        }

        let file = write_config(dir.path(), "");
        let config = Config::from_file(&file).unwrap();
        let mut options = test_options(dir.path());
        options.cleanup_timeout = Duration::ZERO;
        let manager = Manager::initialize(config, options).await.ok().unwrap();

        // startup did not wait for the deletion
        assert_eq!(manager.metrics.get_snapshot().temp_cleanups_deferred, 1);
        assert_eq!(manager.system_status().await.status, SystemStatusEnum::Ok);

        for _ in 0..200 {
            if manager.jobs.len().await == 0 && std::fs::read_dir(&tmp).unwrap().count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(manager.jobs.len().await, 0);
        assert!(tmp.is_dir());
        assert_eq!(std::fs::read_dir(&tmp).unwrap().count(), 0);
        manager.close_for_exit(0).await;
    }

    #[tokio::test]
    async fn test_startup_forgets_staged_downloads() {
        let dir = TempDir::new().unwrap();
        let manager = configured_manager(dir.path(), "").await;
        let stage = manager.paths().unwrap().generated.downloads;
        let hash = manager.downloads.register_file(stage.join("scene.zip"), "application/zip", false);
        assert!(manager.downloads.get(&hash).is_some());

        manager.post_init().await.unwrap();
        assert!(manager.downloads.is_empty());
        manager.close_for_exit(0).await;
    }

    #[tokio::test]
    async fn test_dlna_autostart_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let manager = configured_manager(dir.path(), "dlna_default_enabled = true").await;
        assert!(!manager.streaming.is_running());

        let dir2 = TempDir::new().unwrap();
        let manager2 = configured_manager(
            dir2.path(),
            &format!("dlna_default_enabled = true\nlibraries = [{:?}]", dir2.path().display().to_string()),
        )
        .await;
        assert!(manager2.streaming.is_running());
        manager2.close_for_exit(0).await;
        assert!(!manager2.streaming.is_running());
        manager.close_for_exit(0).await;
    }

    #[tokio::test]
    async fn test_close_for_exit_cancels_jobs() {
        let dir = TempDir::new().unwrap();
        let manager = configured_manager(dir.path(), "").await;

        let stopped = Arc::new(AtomicUsize::new(0));
        let flag = stopped.clone();
        manager
            .jobs
            .spawn("wait for cancel", move |cancel| async move {
                cancel.cancelled().await;
                flag.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert_eq!(manager.close_for_exit(0).await, 0);
        assert!(!manager.database.is_open().await);
        for _ in 0..50 {
            if stopped.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }
}
