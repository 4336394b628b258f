use std::fs;

use z3::{Config, Context};
use ponce::state::options::{load_options, save_options, OptionsError, ENCODED_SIZE, MAX_PATH};
use ponce::state::state_manager::Logger;
use ponce::state::{Options, Session};

#[cfg(test)]
mod tests {
    use log::{Level, LevelFilter, Log, Record};

    use super::*;

    fn custom_options() -> Options {
        Options {
            limit_instructions_tracing_mode: 500,
            limit_time: 5,
            solver_timeout: 3,
            use_tainting_engine: true,
            use_symbolic_engine: false,
            color_tainted: 0x123456,
            show_debug_info: true,
            taint_through_pointers: true,
            paint_executed_instructions: true,
            blacklist_path: "/tmp/ponce_blacklist.txt".to_string(),
            ..Options::default()
        }
    }

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.limit_instructions_tracing_mode, 10000);
        assert_eq!(options.limit_time, 60);
        assert_eq!(options.solver_timeout, 10);
        assert!(options.use_symbolic_engine);
        assert!(!options.use_tainting_engine);
        assert!(options.blacklist_path.is_empty());
        assert_eq!(options.log_level(), LevelFilter::Info);
    }

    #[test]
    fn test_bytes_round_trip() {
        let options = custom_options();
        let bytes = options.to_bytes().unwrap();
        assert_eq!(bytes.len(), ENCODED_SIZE);
        assert_eq!(&bytes[..8], &500u64.to_le_bytes());
        assert_eq!(Options::from_bytes(&bytes).unwrap(), options);
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let bytes = Options::default().to_bytes().unwrap();
        match Options::from_bytes(&bytes[..ENCODED_SIZE - 1]) {
            Err(OptionsError::SizeMismatch { expected, found }) => {
                assert_eq!(expected, ENCODED_SIZE);
                assert_eq!(found, ENCODED_SIZE - 1);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_path_too_long() {
        let options = Options { blacklist_path: "a".repeat(MAX_PATH), ..Options::default() };
        assert!(matches!(options.to_bytes(), Err(OptionsError::PathTooLong(len)) if len == MAX_PATH));
    }

    #[test]
    fn test_save_and_load_file() {
        let path = std::env::temp_dir().join("ponce_test_options.cfg");
        let options = custom_options();
        save_options(&path, &options).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len() as usize, ENCODED_SIZE);
        assert_eq!(load_options(&path).unwrap(), Some(options));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("ponce_test_options_missing.cfg");
        let _ = fs::remove_file(&path);
        assert_eq!(load_options(&path).unwrap(), None);
    }

    #[test]
    fn test_log_level() {
        let options = Options { show_debug_info: true, ..Options::default() };
        assert_eq!(options.log_level(), LevelFilter::Debug);
        let options = Options { show_extra_debug_info: true, ..options };
        assert_eq!(options.log_level(), LevelFilter::Trace);
    }

    #[test]
    fn test_session_loads_blacklist_from_options() {
        let path = std::env::temp_dir().join("ponce_test_options_blacklist.txt");
        fs::write(&path, "check_serial\n").unwrap();
        let options = Options { blacklist_path: path.to_string_lossy().into_owned(), ..Options::default() };

        let cfg = Config::new();
        let ctx = Box::leak(Box::new(Context::new(&cfg)));
        let mut session = Session::new(ctx, options);
        assert!(session.blacklist.has_user_list());
        assert!(session.blacklist.contains("check_serial"));

        session.options.blacklist_path.clear();
        session.apply_options().unwrap();
        assert!(!session.blacklist.has_user_list());

        session.options.blacklist_path = "/nonexistent/ponce/blacklist.txt".to_string();
        assert!(session.apply_options().is_err());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_logger_writes_to_file() {
        let path = std::env::temp_dir().join("ponce_test_log.txt");
        let _ = fs::remove_file(&path);
        let logger = Logger::new(Some(path.to_str().unwrap())).unwrap();
        log::set_max_level(LevelFilter::Info);

        logger.log(&Record::builder().args(format_args!("Snapshot taken")).level(Level::Info).build());
        logger.log(&Record::builder().args(format_args!("hidden")).level(Level::Trace).build());
        logger.flush();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("[INFO] Snapshot taken\n"));
        assert!(!content.contains("hidden"));
        let _ = fs::remove_file(&path);
    }
}
