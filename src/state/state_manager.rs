/// Analysis session: the engine, the snapshot, the runtime status and the options,
/// plus the dual-sink logger used by the whole crate

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use log::{error, info, LevelFilter, Log, Metadata, Record};
use z3::ast::Bool;
use z3::Context;

use crate::concolic::blacklist::{Blacklist, PendingBreakpoints};
use crate::concolic::executor::Engine;
use crate::state::annotations::Annotations;
use crate::state::options::Options;
use crate::state::runtime_status::RuntimeStatus;
use crate::state::snapshot::Snapshot;

/// Extra predicate conjoined into every solver query.
#[derive(Debug, Clone)]
pub struct UserConstraint<'ctx> {
    pub id: usize,
    pub predicate: Bool<'ctx>,
    pub text: String,
}

pub struct Session<'ctx> {
    pub ctx: &'ctx Context,
    pub engine: Engine<'ctx>,
    pub status: RuntimeStatus,
    pub snapshot: Snapshot<'ctx>,
    pub options: Options,
    pub blacklist: Blacklist,
    pub pending_breakpoints: PendingBreakpoints<'ctx>,
    pub annotations: Annotations,
    user_constraints: Vec<UserConstraint<'ctx>>,
    next_constraint_id: usize,
}

impl<'ctx> Session<'ctx> {
    pub fn new(ctx: &'ctx Context, options: Options) -> Self {
        let mut session = Session {
            ctx,
            engine: Engine::new(ctx),
            status: RuntimeStatus::new(),
            snapshot: Snapshot::new(),
            options,
            blacklist: Blacklist::new(),
            pending_breakpoints: PendingBreakpoints::new(),
            annotations: Annotations::new(),
            user_constraints: Vec::new(),
            next_constraint_id: 0,
        };
        if let Err(e) = session.apply_options() {
            error!("[!] {}", e);
        }
        session
    }

    /// Propagates the options that take effect immediately: log level and user blacklist.
    pub fn apply_options(&mut self) -> Result<()> {
        log::set_max_level(self.options.log_level());
        if self.options.blacklist_path.is_empty() {
            self.blacklist.clear_user_list();
            return Ok(());
        }
        let path = self.options.blacklist_path.clone();
        self.blacklist
            .load_file(Path::new(&path))
            .with_context(|| format!("Cannot load the blacklist file {}", path))
    }

    pub fn add_user_constraint(&mut self, predicate: Bool<'ctx>, text: &str) -> usize {
        let id = self.next_constraint_id;
        self.next_constraint_id += 1;
        info!("User constraint #{} added: {}", id, text);
        self.user_constraints.push(UserConstraint { id, predicate, text: text.to_string() });
        id
    }

    pub fn remove_user_constraint(&mut self, id: usize) -> bool {
        let before = self.user_constraints.len();
        self.user_constraints.retain(|c| c.id != id);
        before != self.user_constraints.len()
    }

    pub fn user_constraints(&self) -> &[UserConstraint<'ctx>] {
        &self.user_constraints
    }
}

/// Log sink writing every record both to a file and to the terminal.
#[derive(Clone, Debug)]
pub struct Logger {
    file: Option<Arc<Mutex<File>>>,
    terminal: Arc<Mutex<io::Stdout>>,
}

impl Logger {
    pub fn new(file_path: Option<&str>) -> io::Result<Self> {
        let file = match file_path {
            Some(path) => Some(Arc::new(Mutex::new(OpenOptions::new().create(true).append(true).open(path)?))),
            None => None,
        };
        Ok(Logger { file, terminal: Arc::new(Mutex::new(io::stdout())) })
    }

    /// Installs the logger as the `log` backend. Fails when a logger is already installed.
    pub fn init(file_path: Option<&str>, level: LevelFilter) -> Result<()> {
        let logger = Logger::new(file_path).context("Cannot open the log file")?;
        log::set_logger(Box::leak(Box::new(logger))).map_err(|e| anyhow::anyhow!("{}", e))?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("[{}] {}\n", record.level(), record.args());
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(line.as_bytes());
            }
        }
        if let Ok(mut terminal) = self.terminal.lock() {
            let _ = terminal.write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        if let Ok(mut terminal) = self.terminal.lock() {
            let _ = terminal.flush();
        }
    }
}
