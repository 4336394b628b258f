/// Library calls that are not worth tracing. The tracer stops before such a call and
/// resumes on a one-shot breakpoint placed right after it.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use log::{debug, error, info};
use regex::Regex;

use crate::concolic::tracer::TraceOutcome;
use crate::debugger::Debugger;
use crate::state::cpu_state::volatile_registers;
use crate::state::state_manager::Session;

pub const BLACKLIST_BREAKPOINT_COMMENT: &str = "Temporal bp set by ponce for blacklisting";

lazy_static! {
    pub static ref BUILTIN_BLACKLIST: BTreeSet<&'static str> = [
        "printf", "puts", "putc", "sleep", "recv", "recvfrom", "send", "closesocket", "exit", "abort",
        "malloc", "calloc", "realloc", "free", "calloc_crt", "realloc_crt",
        // cstdio
        "clearerr", "fclose", "feof", "ferror", "fflush", "fgetc", "fgetpos", "fgets", "fopen", "fprintf",
        "fputc", "fputs", "fread", "freopen", "fscanf", "fseek", "fsetpos", "ftell", "fwrite", "getc",
        "getchar", "gets", "perror", "remove", "rename", "rewind", "scanf", "setbuf", "setvbuf", "snprintf",
        "sprintf", "sscanf", "tmpfile", "tmpnam", "ungetc", "vfprintf", "vfscanf", "vprintf", "vscanf",
        "vsnprintf", "vsprintf", "vsscanf",
        // Windows API
        "Sleep", "HeapAlloc", "HeapFree", "HeapRealloc", "CreateThread", "NtTerminateProcess", "ExitThread",
        "TerminateThread", "ExitProcess", "EnterCriticalSection", "LeaveCriticalSection", "SendMessage",
        "WSAGetLastError", "WaitForSingleObject", "CloseHandle",
    ]
    .into_iter()
    .collect();

    static ref NAME_PREFIX: Regex = Regex::new(r"^(__imp__|imp_|cs:|ds:|j_|_|@|\?)").unwrap();
    static ref NUMBERED_SUFFIX: Regex = Regex::new(r"_[0-9]$").unwrap();
}

/// Strips the decorations disassemblers put around imported names
/// (`__imp__`, `imp_`, `cs:`, `ds:`, `j_`, leading `_ @ ?`, `@...` and `_N` suffixes).
pub fn clean_function_name(name: &str) -> String {
    let mut name = name.to_string();
    loop {
        if let Some(prefix) = NAME_PREFIX.find(&name) {
            name = name[prefix.end()..].to_string();
        } else if let Some(position) = name.find('@') {
            name.truncate(position);
        } else if NUMBERED_SUFFIX.is_match(&name) {
            name.truncate(name.len() - 2);
        } else {
            return name;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    // Replaces the built-in list when loaded
    user: Option<BTreeSet<String>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Blacklist::default()
    }

    /// One function name per line; blank lines are ignored.
    pub fn load_file(&mut self, path: &Path) -> io::Result<usize> {
        let content = fs::read_to_string(path)?;
        let names: BTreeSet<String> =
            content.lines().map(str::trim).filter(|line| !line.is_empty()).map(str::to_string).collect();
        let count = names.len();
        self.user = Some(names);
        info!("Loaded {} functions from the blacklist file {}", count, path.display());
        Ok(count)
    }

    pub fn set_user_list<I: IntoIterator<Item = String>>(&mut self, names: I) {
        self.user = Some(names.into_iter().collect());
    }

    pub fn clear_user_list(&mut self) {
        self.user = None;
    }

    pub fn has_user_list(&self) -> bool {
        self.user.is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        match &self.user {
            Some(user) => user.contains(name),
            None => BUILTIN_BLACKLIST.contains(name),
        }
    }
}

pub type BreakpointCallback<'ctx> = Box<dyn FnMut(&mut Session<'ctx>, &mut dyn Debugger, u64) + 'ctx>;

/// Work to run when the debuggee hits the breakpoint at `address`.
pub struct PendingBreakpoint<'ctx> {
    pub address: u64,
    // Set when the breakpoint belongs to the user and must survive the action
    pub ignore_breakpoint: bool,
    pub callback: BreakpointCallback<'ctx>,
}

#[derive(Default)]
pub struct PendingBreakpoints<'ctx> {
    actions: Vec<PendingBreakpoint<'ctx>>,
}

impl<'ctx> PendingBreakpoints<'ctx> {
    pub fn new() -> Self {
        PendingBreakpoints { actions: Vec::new() }
    }

    pub fn push(&mut self, action: PendingBreakpoint<'ctx>) {
        self.actions.push(action);
    }

    // Removes and returns the first action queued for `address`
    pub fn take(&mut self, address: u64) -> Option<PendingBreakpoint<'ctx>> {
        let position = self.actions.iter().position(|a| a.address == address)?;
        Some(self.actions.remove(position))
    }

    pub fn contains(&self, address: u64) -> bool {
        self.actions.iter().any(|a| a.address == address)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }
}

/// Resumes the analysis after a blacklisted call returned. The callee may have clobbered
/// the caller-saved registers, so their symbolic and taint state is dropped.
pub fn enable_trigger_and_concretize_registers(session: &mut Session<'_>, _debugger: &mut dyn Debugger, address: u64) {
    session.status.trigger.enable();
    let arch = match session.engine.architecture() {
        Some(arch) => arch,
        None => return,
    };
    for name in volatile_registers(arch) {
        if let Err(e) = session.engine.concretize_register(name).and_then(|_| session.engine.untaint_register(name)) {
            error!("[!] Cannot concretize {}: {}", name, e);
        }
    }
    debug!("Analysis resumed at 0x{:x}, volatile registers concretized", address);
}

impl<'ctx> Session<'ctx> {
    /// Checks the call at `pc` against the blacklist. On a match the call itself is lifted,
    /// tracing is paused and a breakpoint after the call resumes it.
    pub fn should_blacklist(&mut self, debugger: &mut dyn Debugger, pc: u64, thread_id: u64) -> bool {
        let decoded = match debugger.decode_instruction(pc) {
            Some(decoded) => decoded,
            None => return false,
        };
        if !decoded.mnemonic.is_call() {
            return false;
        }
        let name = match debugger.callee_name(pc) {
            Some(name) => clean_function_name(&name),
            None => return false,
        };
        if !self.blacklist.contains(&name) {
            return false;
        }

        let next = match debugger.next_instruction_address(pc) {
            Some(next) => next,
            None => {
                error!("[!] No instruction after the blacklisted call at 0x{:x}", pc);
                return false;
            }
        };
        let user_breakpoint = debugger.has_breakpoint(next);
        if !user_breakpoint {
            debugger.add_breakpoint(next);
        }
        debugger.set_comment(next, BLACKLIST_BREAKPOINT_COMMENT);
        self.pending_breakpoints.push(PendingBreakpoint {
            address: next,
            ignore_breakpoint: user_breakpoint,
            callback: Box::new(enable_trigger_and_concretize_registers),
        });
        info!("[+] Blacklisted call to {} at 0x{:x}, resuming at 0x{:x}", name, pc, next);

        debugger.enable_step_trace(false);
        if self.tritonize(debugger, pc, thread_id) == TraceOutcome::Failed {
            error!("[!] The blacklisted call at 0x{:x} could not be lifted", pc);
        }
        self.status.trigger.disable();
        true
    }
}
